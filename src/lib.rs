//! C++ bindings: device listing and a pollable flash job

use dfu::{
    FlashOptions, FlashStatus, Flasher, MatchCriteria, NusbBackend,
    find_dfu_devices,
};

#[cxx::bridge]
mod ffi {

    struct DeviceInfo {
        vendor_id: u16,
        product_id: u16,
        interface: u8,
        alt_setting: u8,
        alt_name: String,
        serial: String,
        path: String,
        dfu_mode: bool,
    }

    extern "Rust" {
        type DfuDeviceFilter;

        #[Self = "DfuDeviceFilter"]
        fn empty_filter() -> Box<DfuDeviceFilter>;

        fn with_vendor_id(&mut self, vid: u16);
        fn with_product_id(&mut self, pid: u16);
        fn with_serial(&mut self, serial: &str);
        fn with_serial_dfu(&mut self, serial: &str);
        fn with_alt_setting(&mut self, alt: u8);
        fn find_devices(&self) -> Result<Vec<DeviceInfo>>;
    }

    extern "Rust" {
        type FlashJob;

        #[Self = "FlashJob"]
        fn new_job() -> Box<FlashJob>;

        fn flash_file(&self, path: &str, filter: &DfuDeviceFilter) -> i32;
        fn progress(&self) -> i32;
        fn finished(&self) -> i32;
    }
}

#[derive(Default)]
pub struct DfuDeviceFilter {
    criteria: MatchCriteria,
}

/// One flash run at a time; `progress` and `finished` may be polled from
/// another thread while `flash_file` runs.
#[derive(Default)]
pub struct FlashJob {
    status: FlashStatus,
}

impl DfuDeviceFilter {
    fn empty_filter() -> Box<DfuDeviceFilter> {
        Box::new(DfuDeviceFilter::default())
    }

    fn with_vendor_id(&mut self, vid: u16) {
        self.criteria.vendor.replace(vid);
    }

    fn with_product_id(&mut self, pid: u16) {
        self.criteria.product.replace(pid);
    }

    fn with_serial(&mut self, serial: &str) {
        self.criteria.serial.replace(serial.into());
    }

    fn with_serial_dfu(&mut self, serial: &str) {
        self.criteria.serial_dfu.replace(serial.into());
    }

    fn with_alt_setting(&mut self, alt: u8) {
        self.criteria.alt_setting.replace(alt);
    }

    fn find_devices(&self) -> Result<Vec<ffi::DeviceInfo>, dfu::DfuError> {
        Ok(find_dfu_devices(&self.criteria)?
            .iter()
            .map(|device| ffi::DeviceInfo {
                vendor_id: device.vendor_id(),
                product_id: device.product_id(),
                interface: device.interface(),
                alt_setting: device.alt_setting(),
                alt_name: device.alt_name().unwrap_or("").into(),
                serial: device.serial_number().unwrap_or("").into(),
                path: device.path().into(),
                dfu_mode: device.is_dfu_mode(),
            })
            .collect())
    }
}

impl FlashJob {
    fn new_job() -> Box<FlashJob> {
        Box::new(FlashJob::default())
    }

    /// 0 on success, a positive errno value otherwise
    fn flash_file(&self, path: &str, filter: &DfuDeviceFilter) -> i32 {
        let flasher = Flasher::new(
            NusbBackend::default(),
            FlashOptions {
                criteria: filter.criteria.clone(),
                ..Default::default()
            },
        );
        match flasher.flash_file(path, &self.status, |_, _| {}) {
            Ok(()) => 0,
            Err(err) => err.code(),
        }
    }

    fn progress(&self) -> i32 {
        self.status.progress() as i32
    }

    fn finished(&self) -> i32 {
        self.status.finished().as_i32()
    }
}
