use crate::status::{DfuState, DfuStatusCode};

const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const EIO: i32 = 5;
const EFAULT: i32 = 14;

#[derive(Debug)]
pub enum DfuError {
    Usb(nusb::Error),
    Transfer(nusb::transfer::TransferError),
    Io(std::io::Error),
    File(dfu_file::DfuFileError),
    /// `DFU_GETSTATUS` / `DFU_GETSTATE` reply of unexpected length
    ShortReply { expected: usize, got: usize },
    /// Device reported a non-OK status
    Status { status: DfuStatusCode, state: DfuState },
    /// Device is still running its application
    RuntimeMode(DfuState),
    /// Device did not settle in `dfuIDLE` within the poll budget
    NotIdle(DfuState),
    /// `DFU_ABORT` was not honoured: the channel cannot be trusted anymore
    AbortFailed(String),
    NoDevice,
    ManyDevices(usize),
    IdMismatch {
        file: (u16, u16),
        device: (u16, u16),
    },
    TransferSizeUnknown,
    /// Failure inside the chunked transfer loop
    Download(Box<DfuError>),
    /// Upload without length did not end within the size bound
    UploadTooLarge(usize),
    Timeout,
}

impl DfuError {
    /// errno-style result code of this error
    pub fn code(&self) -> i32 {
        match self {
            DfuError::NoDevice | DfuError::ManyDevices(_) => ENODEV,
            // firmware file that cannot be opened
            DfuError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ENODEV
            }
            DfuError::IdMismatch { .. } | DfuError::TransferSizeUnknown => {
                EINVAL
            }
            DfuError::File(_) | DfuError::UploadTooLarge(_) => EINVAL,
            DfuError::Download(_) => EFAULT,
            DfuError::Usb(_)
            | DfuError::Transfer(_)
            | DfuError::Io(_)
            | DfuError::ShortReply { .. }
            | DfuError::Status { .. }
            | DfuError::RuntimeMode(_)
            | DfuError::NotIdle(_)
            | DfuError::AbortFailed(_)
            | DfuError::Timeout => EIO,
        }
    }

    /// Errors after which no further request should be sent to any device
    pub fn is_fatal(&self) -> bool {
        match self {
            DfuError::AbortFailed(_) => true,
            DfuError::Download(inner) => inner.is_fatal(),
            _ => false,
        }
    }
}

impl std::error::Error for DfuError {}

impl std::fmt::Display for DfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuError::Usb(err) => write!(f, "USB error: {}", err),
            DfuError::Transfer(err) => write!(f, "Transfer error: {}", err),
            DfuError::Io(err) => write!(f, "IO error: {}", err),
            DfuError::File(err) => write!(f, "{}", err),
            DfuError::ShortReply { expected, got } => {
                write!(f, "Short reply: expected {} bytes, got {}", expected, got)
            }
            DfuError::Status { status, state } => {
                write!(
                    f,
                    "DFU status error: {} ({}), state {}",
                    status.message(),
                    status.code(),
                    state
                )
            }
            DfuError::RuntimeMode(state) => {
                write!(f, "Device still in runtime mode ({})", state)
            }
            DfuError::NotIdle(state) => {
                write!(f, "Device did not reach dfuIDLE (last state {})", state)
            }
            DfuError::AbortFailed(reason) => {
                write!(f, "Abort failed: {}", reason)
            }
            DfuError::NoDevice => write!(f, "No DFU capable USB device found"),
            DfuError::ManyDevices(count) => write!(
                f,
                "More than one DFU capable USB device found ({count} matches): \
                 use `list' and specify the serial number, path or alt setting, \
                 or disconnect all but one device"
            ),
            DfuError::IdMismatch { file, device } => write!(
                f,
                "File ID {:04x}:{:04x} does not match device ({:04x}:{:04x})",
                file.0, file.1, device.0, device.1
            ),
            DfuError::TransferSizeUnknown => {
                write!(f, "Transfer size must be specified")
            }
            DfuError::Download(err) => write!(f, "Download failed: {}", err),
            DfuError::UploadTooLarge(max) => write!(
                f,
                "Device sent more than {max} bytes, specify the upload length"
            ),
            DfuError::Timeout => write!(f, "Timeout"),
        }
    }
}

impl From<nusb::Error> for DfuError {
    fn from(err: nusb::Error) -> Self {
        DfuError::Usb(err)
    }
}

impl From<nusb::transfer::TransferError> for DfuError {
    fn from(err: nusb::transfer::TransferError) -> Self {
        DfuError::Transfer(err)
    }
}

impl From<std::io::Error> for DfuError {
    fn from(err: std::io::Error) -> Self {
        DfuError::Io(err)
    }
}

impl From<dfu_file::DfuFileError> for DfuError {
    fn from(err: dfu_file::DfuFileError) -> Self {
        DfuError::File(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(DfuError::NoDevice.code(), ENODEV);
        assert_eq!(DfuError::ManyDevices(2).code(), ENODEV);
        assert_eq!(DfuError::TransferSizeUnknown.code(), EINVAL);
        assert_eq!(DfuError::NotIdle(DfuState::DfuManifest).code(), EIO);
        assert_eq!(
            DfuError::Download(Box::new(DfuError::Timeout)).code(),
            EFAULT
        );
    }

    #[test]
    fn test_fatal() {
        assert!(!DfuError::Timeout.is_fatal());
        assert!(DfuError::AbortFailed("stall".into()).is_fatal());
        assert!(
            DfuError::Download(Box::new(DfuError::AbortFailed("stall".into())))
                .is_fatal()
        );
    }
}
