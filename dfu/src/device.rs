use std::{num::NonZeroU8, time::Duration};

use log::{debug, warn};
use nusb::{self, MaybeFuture};

use dfu_file::WILDCARD_ID;

use crate::{
    DEFAULT_TIMEOUT, DfuConnection, DfuError, Quirks, descriptor::*,
    transport::DfuTransport,
};

const DFU_CLASS: u8 = 0xFE;
const DFU_SUBCLASS: u8 = 0x1;
const DFU_PROTOCOL_DFU_MODE: u8 = 0x2;

/// Device selection filter
///
/// Every field left to `None` matches anything. DFU mode devices are
/// matched against the `*_dfu` fields, falling back to the runtime ones
/// when those are not set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    pub vendor: Option<u16>,
    pub product: Option<u16>,
    pub vendor_dfu: Option<u16>,
    pub product_dfu: Option<u16>,
    pub serial: Option<String>,
    pub serial_dfu: Option<String>,
    /// Bus path as `<bus>-<port>[.<port>...]`
    pub path: Option<String>,
    pub config: Option<u8>,
    pub interface: Option<u8>,
    pub alt_setting: Option<u8>,
    pub alt_name: Option<String>,
    /// Device address on its bus
    pub devnum: Option<u8>,
}

impl MatchCriteria {
    /// Adopt the IDs embedded in a firmware file where no ID was requested
    pub fn with_firmware_ids(&self, vendor_id: u16, product_id: u16) -> Self {
        let mut criteria = self.clone();
        if criteria.vendor.is_none() && vendor_id != WILDCARD_ID {
            criteria.vendor = Some(vendor_id);
        }
        if criteria.product.is_none() && product_id != WILDCARD_ID {
            criteria.product = Some(product_id);
        }
        criteria
    }

    pub fn matches<H>(&self, device: &DfuDevice<H>) -> bool {
        let (vendor, product, serial) = if device.is_dfu_mode() {
            (
                self.vendor_dfu.or(self.vendor),
                self.product_dfu.or(self.product),
                self.serial_dfu.as_deref().or(self.serial.as_deref()),
            )
        } else {
            (self.vendor, self.product, self.serial.as_deref())
        };

        vendor.is_none_or(|id| device.vendor_id() == id)
            && product.is_none_or(|id| device.product_id() == id)
            && serial.is_none_or(|s| device.serial_number() == Some(s))
            && self.path.as_deref().is_none_or(|p| device.path() == p)
            && self.config.is_none_or(|c| device.config() == c)
            && self.interface.is_none_or(|i| device.interface() == i)
            && self.alt_setting.is_none_or(|a| device.alt_setting() == a)
            && self
                .alt_name
                .as_deref()
                .is_none_or(|n| device.alt_name() == Some(n))
            && self.devnum.is_none_or(|n| device.device_address() == n)
    }
}

/// One DFU interface alternate setting of an attached device
///
/// `H` is the backend specific handle used to open the device.
#[derive(Clone, Debug)]
pub struct DfuDevice<H = nusb::DeviceInfo> {
    handle: H,
    vendor_id: u16,
    product_id: u16,
    bcd_device: u16,
    bus_id: String,
    device_address: u8,
    path: String,
    serial: Option<String>,
    config: u8,
    interface: u8,
    alt_setting: u8,
    alt_name: Option<String>,
    dfu_mode: bool,
    descriptor: DfuDescriptor,
    max_packet_size: u8,
    quirks: Quirks,
}

impl<H> DfuDevice<H> {
    pub fn new(
        handle: H,
        vendor_id: u16,
        product_id: u16,
        interface: u8,
        alt_setting: u8,
    ) -> Self {
        DfuDevice {
            handle,
            vendor_id,
            product_id,
            bcd_device: 0,
            bus_id: String::new(),
            device_address: 0,
            path: String::new(),
            serial: None,
            config: 1,
            interface,
            alt_setting,
            alt_name: None,
            dfu_mode: true,
            descriptor: DfuDescriptor::default(),
            max_packet_size: 64,
            quirks: Quirks::lookup(vendor_id, product_id, 0),
        }
    }

    pub fn with_bcd_device(mut self, bcd_device: u16) -> Self {
        self.bcd_device = bcd_device;
        self.quirks =
            Quirks::lookup(self.vendor_id, self.product_id, bcd_device);
        self
    }

    pub fn with_location(
        mut self,
        bus_id: &str,
        device_address: u8,
        ports: &[u8],
    ) -> Self {
        self.bus_id = bus_id.to_owned();
        self.device_address = device_address;
        self.path = format_path(bus_id, ports);
        self
    }

    pub fn with_serial(mut self, serial: Option<&str>) -> Self {
        self.serial = serial.map(String::from);
        self
    }

    pub fn with_config(mut self, config: u8) -> Self {
        self.config = config;
        self
    }

    pub fn with_alt_name(mut self, alt_name: Option<String>) -> Self {
        self.alt_name = alt_name;
        self
    }

    pub fn with_dfu_mode(mut self, dfu_mode: bool) -> Self {
        self.dfu_mode = dfu_mode;
        self
    }

    pub fn with_descriptor(mut self, descriptor: DfuDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: u8) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// `bcdDevice`
    pub fn device_version(&self) -> u16 {
        self.bcd_device
    }

    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn config(&self) -> u8 {
        self.config
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn alt_name(&self) -> Option<&str> {
        self.alt_name.as_deref()
    }

    /// The interface is a DFU mode interface (as opposed to a runtime one)
    pub fn is_dfu_mode(&self) -> bool {
        self.dfu_mode
    }

    pub fn descriptor(&self) -> &DfuDescriptor {
        &self.descriptor
    }

    /// `bMaxPacketSize0`
    pub fn max_packet_size(&self) -> u8 {
        self.max_packet_size
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    /// Wrap an opened transport into a connection carrying this
    /// interface's parameters
    pub fn connection<T: DfuTransport>(&self, transport: T) -> DfuConnection<T> {
        DfuConnection::new(
            transport,
            self.alt_setting,
            self.descriptor,
            self.max_packet_size,
            (self.vendor_id, self.product_id),
            self.quirks,
        )
    }
}

fn format_path(bus_id: &str, ports: &[u8]) -> String {
    let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
    format!("{}-{}", bus_id, ports.join("."))
}

fn is_dfu_descriptor(desc: &nusb::descriptors::Descriptor) -> bool {
    desc.descriptor_type() == DFU_DESC_TYPE
        && desc.descriptor_len() >= DFU_DESC_LEN_1_0
}

fn is_dfu_device(dev: &nusb::DeviceInfo) -> bool {
    dev.interfaces()
        .any(|i| i.class() == DFU_CLASS && i.subclass() == DFU_SUBCLASS)
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
    timeout: Duration,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(timeout)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, timeout)
        .wait()
        .ok()
}

/// Enumerate the DFU interfaces of one attached device
fn probe_device(
    info: &nusb::DeviceInfo,
) -> Result<Vec<DfuDevice<nusb::DeviceInfo>>, DfuError> {
    let open_dev: nusb::Device = info.open().wait()?;
    let max_packet_size = open_dev.device_descriptor().max_packet_size_0();

    // device wide fallback if the interface does not carry its own
    let device_descriptor = open_dev.configurations().find_map(|config| {
        config.interface_alt_settings().find_map(|alt| {
            alt.descriptors()
                .find(is_dfu_descriptor)
                .and_then(|desc| DfuDescriptor::parse(&desc))
        })
    });

    let mut devices = Vec::new();
    for config in open_dev.configurations() {
        for alt in config.interface_alt_settings() {
            if alt.class() != DFU_CLASS || alt.subclass() != DFU_SUBCLASS {
                continue;
            }
            let descriptor = alt
                .descriptors()
                .find(is_dfu_descriptor)
                .and_then(|desc| DfuDescriptor::parse(&desc))
                .or(device_descriptor)
                .unwrap_or_default();
            let alt_name = alt.string_index().and_then(|idx| {
                get_string_descriptor(&open_dev, idx, DEFAULT_TIMEOUT)
            });

            devices.push(
                DfuDevice::new(
                    info.clone(),
                    info.vendor_id(),
                    info.product_id(),
                    alt.interface_number(),
                    alt.alternate_setting(),
                )
                .with_bcd_device(info.device_version())
                .with_location(
                    info.bus_id(),
                    info.device_address(),
                    info.port_chain(),
                )
                .with_serial(info.serial_number())
                .with_config(config.configuration_value())
                .with_alt_name(alt_name)
                .with_dfu_mode(alt.protocol() == DFU_PROTOCOL_DFU_MODE)
                .with_descriptor(descriptor)
                .with_max_packet_size(max_packet_size),
            );
        }
    }
    Ok(devices)
}

/// Find all DFU interfaces matching `criteria`
///
/// Returns one entry per interface alternate setting, in bus enumeration
/// order.
pub fn find_dfu_devices(
    criteria: &MatchCriteria,
) -> Result<Vec<DfuDevice>, DfuError> {
    let infos: Vec<nusb::DeviceInfo> =
        nusb::list_devices().wait()?.filter(is_dfu_device).collect();

    let mut dfu_devices = Vec::with_capacity(infos.len());
    for info in infos {
        match probe_device(&info) {
            Ok(devices) => dfu_devices.extend(
                devices.into_iter().filter(|dev| criteria.matches(dev)),
            ),
            Err(err) => warn!(
                "Cannot open DFU device {:04x}:{:04x}: {err}",
                info.vendor_id(),
                info.product_id()
            ),
        }
    }
    debug!("{} matching DFU interface(s)", dfu_devices.len());
    Ok(dfu_devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vid: u16, pid: u16, dfu_mode: bool) -> DfuDevice<()> {
        DfuDevice::new((), vid, pid, 0, 0)
            .with_dfu_mode(dfu_mode)
            .with_location("3", 12, &[1, 4])
            .with_serial(Some("ABC"))
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let criteria = MatchCriteria::default();
        assert!(criteria.matches(&device(0x0483, 0xdf11, true)));
        assert!(criteria.matches(&device(0x1234, 0x5678, false)));
    }

    #[test]
    fn test_dfu_mode_ids_fall_back_to_runtime_ids() {
        let criteria = MatchCriteria {
            vendor: Some(0x0483),
            product: Some(0x5740),
            product_dfu: Some(0xdf11),
            ..Default::default()
        };
        assert!(criteria.matches(&device(0x0483, 0xdf11, true)));
        assert!(!criteria.matches(&device(0x0483, 0x5740, true)));
        assert!(criteria.matches(&device(0x0483, 0x5740, false)));
        assert!(!criteria.matches(&device(0x0484, 0xdf11, true)));
    }

    #[test]
    fn test_location_and_interface_filters() {
        let dev = device(0x0483, 0xdf11, true).with_alt_name(Some(
            "@Internal Flash  /0x08000000/04*016Kg".into(),
        ));
        assert_eq!(dev.path(), "3-1.4");

        let mut criteria = MatchCriteria {
            path: Some("3-1.4".into()),
            devnum: Some(12),
            serial: Some("ABC".into()),
            interface: Some(0),
            alt_setting: Some(0),
            alt_name: Some("@Internal Flash  /0x08000000/04*016Kg".into()),
            ..Default::default()
        };
        assert!(criteria.matches(&dev));

        criteria.alt_setting = Some(1);
        assert!(!criteria.matches(&dev));
        criteria.alt_setting = None;
        criteria.serial_dfu = Some("XYZ".into());
        assert!(!criteria.matches(&dev));
    }

    #[test]
    fn test_firmware_ids_adoption() {
        let criteria = MatchCriteria::default().with_firmware_ids(0x1234, 0xffff);
        assert_eq!(criteria.vendor, Some(0x1234));
        assert_eq!(criteria.product, None);

        let criteria = MatchCriteria {
            vendor: Some(0x0483),
            ..Default::default()
        }
        .with_firmware_ids(0x1234, 0x5678);
        assert_eq!(criteria.vendor, Some(0x0483));
        assert_eq!(criteria.product, Some(0x5678));
    }

    #[test]
    fn test_quirks_follow_device_version() {
        let dev = DfuDevice::new((), 0x1eaf, 0x0003, 0, 1);
        assert!(dev.quirks().is_empty());
        let dev = dev.with_bcd_device(0x0200);
        assert!(dev.quirks().contains(Quirks::POLL_TIMEOUT));
    }
}
