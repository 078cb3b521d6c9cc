//! `DFU_GETSTATUS` reply decoding and the state / status name tables
//! (DFU 1.1, sections 6.1.2 and 6.1.5).

use std::fmt::Display;

use crate::{DEFAULT_POLL_TIMEOUT, DfuError, Quirks};

/// Length of a `DFU_GETSTATUS` reply
pub const DFU_STATUS_LEN: usize = 6;

/// Returned by [status_message] for codes outside of the defined range
pub const INVALID_STATUS: &str = "INVALID";

/// Device state (`bState`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DfuDownloadSync,
    DfuDownloadBusy,
    DfuDownloadIdle,
    DfuManifestSync,
    DfuManifest,
    DfuManifestWaitReset,
    DfuUploadIdle,
    DfuError,
    Unknown(u8),
}

impl DfuState {
    pub fn code(&self) -> u8 {
        match self {
            DfuState::AppIdle => 0,
            DfuState::AppDetach => 1,
            DfuState::DfuIdle => 2,
            DfuState::DfuDownloadSync => 3,
            DfuState::DfuDownloadBusy => 4,
            DfuState::DfuDownloadIdle => 5,
            DfuState::DfuManifestSync => 6,
            DfuState::DfuManifest => 7,
            DfuState::DfuManifestWaitReset => 8,
            DfuState::DfuUploadIdle => 9,
            DfuState::DfuError => 10,
            DfuState::Unknown(code) => *code,
        }
    }

    /// Canonical name as used in the DFU specification
    pub fn name(&self) -> Option<&'static str> {
        match self {
            DfuState::AppIdle => Some("appIDLE"),
            DfuState::AppDetach => Some("appDETACH"),
            DfuState::DfuIdle => Some("dfuIDLE"),
            DfuState::DfuDownloadSync => Some("dfuDNLOAD-SYNC"),
            DfuState::DfuDownloadBusy => Some("dfuDNBUSY"),
            DfuState::DfuDownloadIdle => Some("dfuDNLOAD-IDLE"),
            DfuState::DfuManifestSync => Some("dfuMANIFEST-SYNC"),
            DfuState::DfuManifest => Some("dfuMANIFEST"),
            DfuState::DfuManifestWaitReset => Some("dfuMANIFEST-WAIT-RESET"),
            DfuState::DfuUploadIdle => Some("dfuUPLOAD-IDLE"),
            DfuState::DfuError => Some("dfuERROR"),
            DfuState::Unknown(_) => None,
        }
    }

    /// `appIDLE` or `appDETACH`: the device has not entered DFU mode yet
    pub fn is_runtime(&self) -> bool {
        matches!(self, DfuState::AppIdle | DfuState::AppDetach)
    }
}

impl From<u8> for DfuState {
    fn from(code: u8) -> Self {
        match code {
            0 => DfuState::AppIdle,
            1 => DfuState::AppDetach,
            2 => DfuState::DfuIdle,
            3 => DfuState::DfuDownloadSync,
            4 => DfuState::DfuDownloadBusy,
            5 => DfuState::DfuDownloadIdle,
            6 => DfuState::DfuManifestSync,
            7 => DfuState::DfuManifest,
            8 => DfuState::DfuManifestWaitReset,
            9 => DfuState::DfuUploadIdle,
            10 => DfuState::DfuError,
            other => DfuState::Unknown(other),
        }
    }
}

impl Display for DfuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "unknown state {}", self.code()),
        }
    }
}

/// Device status (`bStatus`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuStatusCode {
    Ok,
    ErrTarget,
    ErrFile,
    ErrWrite,
    ErrErase,
    ErrCheckErased,
    ErrProg,
    ErrVerify,
    ErrAddress,
    ErrNotDone,
    ErrFirmware,
    ErrVendor,
    ErrUsbReset,
    ErrPowerOnReset,
    ErrUnknown,
    ErrStalledPacket,
    Invalid(u8),
}

impl DfuStatusCode {
    pub fn code(&self) -> u8 {
        match self {
            DfuStatusCode::Ok => 0,
            DfuStatusCode::ErrTarget => 1,
            DfuStatusCode::ErrFile => 2,
            DfuStatusCode::ErrWrite => 3,
            DfuStatusCode::ErrErase => 4,
            DfuStatusCode::ErrCheckErased => 5,
            DfuStatusCode::ErrProg => 6,
            DfuStatusCode::ErrVerify => 7,
            DfuStatusCode::ErrAddress => 8,
            DfuStatusCode::ErrNotDone => 9,
            DfuStatusCode::ErrFirmware => 10,
            DfuStatusCode::ErrVendor => 11,
            DfuStatusCode::ErrUsbReset => 12,
            DfuStatusCode::ErrPowerOnReset => 13,
            DfuStatusCode::ErrUnknown => 14,
            DfuStatusCode::ErrStalledPacket => 15,
            DfuStatusCode::Invalid(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DfuStatusCode::Ok => "No error condition is present",
            DfuStatusCode::ErrTarget => {
                "File is not targeted for use by this device"
            }
            DfuStatusCode::ErrFile => {
                "File is for this device but fails some vendor-specific test"
            }
            DfuStatusCode::ErrWrite => "Device is unable to write memory",
            DfuStatusCode::ErrErase => "Memory erase function failed",
            DfuStatusCode::ErrCheckErased => "Memory erase check failed",
            DfuStatusCode::ErrProg => "Program memory function failed",
            DfuStatusCode::ErrVerify => "Programmed memory failed verification",
            DfuStatusCode::ErrAddress => {
                "Cannot program memory due to received address that is out of range"
            }
            DfuStatusCode::ErrNotDone => {
                "Received DFU_DNLOAD with wLength = 0, but device does not think that it has all data yet"
            }
            DfuStatusCode::ErrFirmware => {
                "Device's firmware is corrupt. It cannot return to run-time (non-DFU) operations"
            }
            DfuStatusCode::ErrVendor => {
                "iString indicates a vendor specific error"
            }
            DfuStatusCode::ErrUsbReset => {
                "Device detected unexpected USB reset signalling"
            }
            DfuStatusCode::ErrPowerOnReset => {
                "Device detected unexpected power on reset"
            }
            DfuStatusCode::ErrUnknown => {
                "Something went wrong, but the device does not know what it was"
            }
            DfuStatusCode::ErrStalledPacket => {
                "Device stalled an unexpected request"
            }
            DfuStatusCode::Invalid(_) => INVALID_STATUS,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == DfuStatusCode::Ok
    }
}

impl From<u8> for DfuStatusCode {
    fn from(code: u8) -> Self {
        match code {
            0 => DfuStatusCode::Ok,
            1 => DfuStatusCode::ErrTarget,
            2 => DfuStatusCode::ErrFile,
            3 => DfuStatusCode::ErrWrite,
            4 => DfuStatusCode::ErrErase,
            5 => DfuStatusCode::ErrCheckErased,
            6 => DfuStatusCode::ErrProg,
            7 => DfuStatusCode::ErrVerify,
            8 => DfuStatusCode::ErrAddress,
            9 => DfuStatusCode::ErrNotDone,
            10 => DfuStatusCode::ErrFirmware,
            11 => DfuStatusCode::ErrVendor,
            12 => DfuStatusCode::ErrUsbReset,
            13 => DfuStatusCode::ErrPowerOnReset,
            14 => DfuStatusCode::ErrUnknown,
            15 => DfuStatusCode::ErrStalledPacket,
            other => DfuStatusCode::Invalid(other),
        }
    }
}

impl Display for DfuStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Name of a DFU state code, `None` for codes the specification does not define
pub fn state_name(code: u8) -> Option<&'static str> {
    DfuState::from(code).name()
}

/// Description of a DFU status code, [INVALID_STATUS] if out of range
pub fn status_message(code: u8) -> &'static str {
    DfuStatusCode::from(code).message()
}

/// Decoded `DFU_GETSTATUS` reply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfuStatus {
    status: DfuStatusCode,
    poll_timeout: u32,
    state: DfuState,
    string_index: u8,
}

impl DfuStatus {
    /// Decode a raw reply. `bwPollTimeout` is replaced by
    /// [DEFAULT_POLL_TIMEOUT] when `quirks` contains [Quirks::POLL_TIMEOUT].
    pub fn decode(data: &[u8], quirks: Quirks) -> Result<Self, DfuError> {
        if data.len() != DFU_STATUS_LEN {
            return Err(DfuError::ShortReply {
                expected: DFU_STATUS_LEN,
                got: data.len(),
            });
        }
        let poll_timeout = if quirks.contains(Quirks::POLL_TIMEOUT) {
            DEFAULT_POLL_TIMEOUT
        } else {
            u32::from_le_bytes([data[1], data[2], data[3], 0])
        };
        Ok(DfuStatus {
            status: data[0].into(),
            poll_timeout,
            state: data[4].into(),
            string_index: data[5],
        })
    }

    /// Reply assumed when the device answer could not be decoded
    pub fn unknown_error() -> Self {
        DfuStatus {
            status: DfuStatusCode::ErrUnknown,
            poll_timeout: 0,
            state: DfuState::DfuError,
            string_index: 0,
        }
    }

    pub fn status(&self) -> DfuStatusCode {
        self.status
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    /// Minimum time, in milliseconds, the host should wait before the next
    /// `DFU_GETSTATUS` (`bwPollTimeout`)
    pub fn poll_timeout(&self) -> u32 {
        self.poll_timeout
    }

    pub fn string_index(&self) -> Option<u8> {
        (self.string_index != 0).then_some(self.string_index)
    }

    pub fn ok(&self) -> Result<(), DfuError> {
        self.ret(())
    }

    pub fn ret<T>(&self, t: T) -> Result<T, DfuError> {
        if !self.status.is_ok() {
            Err(DfuError::from(self))
        } else {
            Ok(t)
        }
    }

    /// Sleep for the requested poll timeout
    pub fn wait(&self) {
        if self.poll_timeout > 0 {
            std::thread::sleep(std::time::Duration::from_millis(
                self.poll_timeout as u64,
            ));
        }
    }
}

impl From<&DfuStatus> for DfuError {
    fn from(st: &DfuStatus) -> Self {
        DfuError::Status {
            status: st.status,
            state: st.state,
        }
    }
}

impl Display for DfuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state({}) = {}, status({}) = {}",
            self.state.code(),
            self.state,
            self.status.code(),
            self.status
        )
    }
}
