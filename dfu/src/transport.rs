use std::time::Duration;

use log::trace;
use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use crate::DfuError;

/// Class control transfers addressed to one claimed DFU interface
///
/// Implementations never retry: a stalled or timed out transfer is
/// returned as an error to the caller.
pub trait DfuTransport {
    /// Interface number used as `wIndex`
    fn interface_number(&self) -> u8;

    /// Host-to-device class request, returns the number of bytes sent
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<usize, DfuError>;

    /// Device-to-host class request reading up to `length` bytes
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError>;
}

/// [DfuTransport] over a claimed [`nusb::Interface`]
///
/// Dropping it releases the interface and closes the device.
pub struct UsbTransport {
    interface: nusb::Interface,
    timeout: Duration,
}

impl UsbTransport {
    pub fn new(interface: nusb::Interface, timeout: Duration) -> Self {
        UsbTransport { interface, timeout }
    }
}

impl DfuTransport for UsbTransport {
    fn interface_number(&self) -> u8 {
        self.interface.interface_number()
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        let index = self.interface.interface_number() as u16;
        trace!("OUT req={request} value={value} len={}", data.len());
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                self.timeout,
            )
            .wait()?;
        Ok(data.len())
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let index = self.interface.interface_number() as u16;
        trace!("IN req={request} value={value} len={length}");
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length,
                },
                self.timeout,
            )
            .wait()?)
    }
}
