use dfu::{DfuDevice, MatchCriteria, find_dfu_devices};

use crate::CliError;

pub(crate) fn list_dfu_devices(criteria: &MatchCriteria) -> Result<(), CliError> {
    let devices = find_dfu_devices(criteria)?;
    if devices.is_empty() {
        println!("No DFU device found");
    } else {
        print_devices(&devices);
    }
    Ok(())
}

fn print_devices(devices: &[DfuDevice]) {
    for device in devices {
        let descriptor = device.descriptor();
        println!(
            "Found {}: [{:04x}:{:04x}] ver={:04x}, devnum={}, cfg={}, intf={}, path=\"{}\", alt={}, name=\"{}\", serial=\"{}\"",
            if device.is_dfu_mode() { "DFU" } else { "Runtime" },
            device.vendor_id(),
            device.product_id(),
            device.device_version(),
            device.device_address(),
            device.config(),
            device.interface(),
            device.path(),
            device.alt_setting(),
            device.alt_name().unwrap_or("UNKNOWN"),
            device.serial_number().unwrap_or("UNKNOWN"),
        );
        println!(
            "    DFU {:x}.{:02x}, transfer size {}, attributes ({}{}{}{})",
            descriptor.dfu_version() >> 8,
            descriptor.dfu_version() & 0xff,
            descriptor.transfer_size(),
            if descriptor.can_download() { "d" } else { "" },
            if descriptor.can_upload() { "u" } else { "" },
            if descriptor.manifestation_tolerant() { "m" } else { "" },
            if descriptor.will_detach() { "w" } else { "" },
        );
    }
}
