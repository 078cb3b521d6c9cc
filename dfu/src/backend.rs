use std::time::Duration;

use nusb::MaybeFuture;

use crate::{
    DEFAULT_TIMEOUT, DfuDevice, DfuError, MatchCriteria, UsbTransport,
    find_dfu_devices, transport::DfuTransport,
};

/// Device discovery and opening, as used by [crate::Flasher]
pub trait UsbBackend {
    /// Backend specific reference to an attached device
    type Handle;
    type Transport: DfuTransport;

    /// List all DFU interfaces matching `criteria`
    fn probe(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Vec<DfuDevice<Self::Handle>>, DfuError>;

    /// Open the device, claim its DFU interface and select the alternate
    /// setting. The interface is released when the transport is dropped.
    fn open(
        &self,
        device: &DfuDevice<Self::Handle>,
    ) -> Result<Self::Transport, DfuError>;
}

/// [UsbBackend] for devices attached to the local host
pub struct NusbBackend {
    timeout: Duration,
}

impl NusbBackend {
    pub fn new(timeout: Duration) -> Self {
        NusbBackend { timeout }
    }
}

impl Default for NusbBackend {
    fn default() -> Self {
        NusbBackend::new(DEFAULT_TIMEOUT)
    }
}

impl UsbBackend for NusbBackend {
    type Handle = nusb::DeviceInfo;
    type Transport = UsbTransport;

    fn probe(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Vec<DfuDevice>, DfuError> {
        find_dfu_devices(criteria)
    }

    fn open(&self, device: &DfuDevice) -> Result<UsbTransport, DfuError> {
        let dev = device.handle().open().wait()?;
        let interface = dev.claim_interface(device.interface()).wait()?;
        interface.set_alt_setting(device.alt_setting()).wait()?;
        Ok(UsbTransport::new(interface, self.timeout))
    }
}
