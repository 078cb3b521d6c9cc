use log::{debug, error, warn};

use crate::error::*;
use crate::status::{DFU_STATUS_LEN, DfuState, DfuStatus};
use crate::{DfuDescriptor, Quirks, UsbTransport, transport::DfuTransport};

const DFU_CMD_DETACH: u8 = 0;
const DFU_CMD_DOWNLOAD: u8 = 1;
const DFU_CMD_UPLOAD: u8 = 2;
const DFU_CMD_GETSTATUS: u8 = 3;
const DFU_CMD_CLRSTATUS: u8 = 4;
const DFU_CMD_GETSTATE: u8 = 5;
const DFU_CMD_ABORT: u8 = 6;

/// One claimed DFU interface
///
/// Owns the transport exclusively; dropping the connection releases the
/// interface.
pub struct DfuConnection<T: DfuTransport = UsbTransport> {
    transport: T,
    alt_setting: u8,
    quirks: Quirks,
    descriptor: DfuDescriptor,
    max_packet_size: u8,
    vendor_id: u16,
    product_id: u16,
}

impl<T: DfuTransport> DfuConnection<T> {
    pub fn new(
        transport: T,
        alt_setting: u8,
        descriptor: DfuDescriptor,
        max_packet_size: u8,
        ids: (u16, u16),
        quirks: Quirks,
    ) -> Self {
        DfuConnection {
            transport,
            alt_setting,
            quirks,
            descriptor,
            max_packet_size,
            vendor_id: ids.0,
            product_id: ids.1,
        }
    }

    pub fn interface(&self) -> u8 {
        self.transport.interface_number()
    }

    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn descriptor(&self) -> &DfuDescriptor {
        &self.descriptor
    }

    /// `wTransferSize` from the functional descriptor (0 if unknown)
    pub fn transfer_size(&self) -> u16 {
        self.descriptor.transfer_size()
    }

    /// `bMaxPacketSize0` of the device
    pub fn max_packet_size(&self) -> u8 {
        self.max_packet_size
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// `DFU_DETACH`: ask a runtime mode device to switch to DFU mode.
    ///
    /// Does not wait for the device to actually detach.
    pub fn detach(&self, timeout_ms: u16) -> Result<(), DfuError> {
        debug!("DFU_DETACH (timeout {timeout_ms} ms)");
        self.transport
            .control_out(DFU_CMD_DETACH, timeout_ms, &[])
            .map(|_| ())
    }

    /// `DFU_DNLOAD` of one block. An empty `data` signals the end of
    /// the transfer. The caller keeps `data` within the transfer size.
    pub fn download(
        &self,
        transaction: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        debug!("DFU_DNLOAD block {transaction} ({} bytes)", data.len());
        self.transport
            .control_out(DFU_CMD_DOWNLOAD, transaction, data)
    }

    /// `DFU_UPLOAD` of one block. A reply shorter than `length` marks the
    /// end of the upload.
    pub fn upload(
        &self,
        transaction: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let data =
            self.transport
                .control_in(DFU_CMD_UPLOAD, transaction, length)?;
        debug!("DFU_UPLOAD block {transaction} ({} bytes)", data.len());
        Ok(data)
    }

    /// `DFU_GETSTATUS`
    ///
    /// Transport errors are returned as is. A reply of the wrong length is
    /// reported as [DfuStatus::unknown_error] so that the caller can still
    /// try to clear the error condition.
    pub fn get_status(&self) -> Result<DfuStatus, DfuError> {
        let data = self.transport.control_in(
            DFU_CMD_GETSTATUS,
            0,
            DFU_STATUS_LEN as u16,
        )?;
        let st = match DfuStatus::decode(&data, self.quirks) {
            Ok(st) => st,
            Err(err) => {
                warn!("DFU_GETSTATUS: {err}");
                DfuStatus::unknown_error()
            }
        };
        debug!("DFU_GETSTATUS: {st}");
        Ok(st)
    }

    /// `DFU_CLRSTATUS`, only meaningful in `dfuERROR`
    pub fn clear_status(&self) -> Result<(), DfuError> {
        debug!("DFU_CLRSTATUS");
        self.transport
            .control_out(DFU_CMD_CLRSTATUS, 0, &[])
            .map(|_| ())
    }

    /// `DFU_GETSTATE`
    pub fn get_state(&self) -> Result<DfuState, DfuError> {
        let data = self.transport.control_in(DFU_CMD_GETSTATE, 0, 1)?;
        match data.first() {
            Some(code) => {
                let state = DfuState::from(*code);
                debug!("DFU_GETSTATE: {state}");
                Ok(state)
            }
            None => Err(DfuError::ShortReply {
                expected: 1,
                got: 0,
            }),
        }
    }

    /// `DFU_ABORT`: return to `dfuIDLE` from an idle-adjacent state
    pub fn abort(&self) -> Result<(), DfuError> {
        debug!("DFU_ABORT");
        self.transport
            .control_out(DFU_CMD_ABORT, 0, &[])
            .map(|_| ())
    }

    /// Abort any pending transfer and require the device to be in `dfuIDLE`
    /// afterwards, then honour the poll timeout.
    ///
    /// Any failure here is reported as [DfuError::AbortFailed], which is
    /// fatal: the control channel cannot be relied on anymore.
    pub fn abort_to_idle(&self) -> Result<DfuStatus, DfuError> {
        if let Err(err) = self.abort() {
            error!("Error sending dfu abort request: {err}");
            return Err(DfuError::AbortFailed(format!(
                "error sending dfu abort request: {err}"
            )));
        }
        let st = match self.get_status() {
            Ok(st) => st,
            Err(err) => {
                error!("Error during abort get_status: {err}");
                return Err(DfuError::AbortFailed(format!(
                    "error during abort get_status: {err}"
                )));
            }
        };
        if st.state() != DfuState::DfuIdle {
            error!("Failed to enter idle state on abort ({})", st.state());
            return Err(DfuError::AbortFailed(format!(
                "failed to enter idle state on abort ({})",
                st.state()
            )));
        }
        st.wait();
        Ok(st)
    }
}
