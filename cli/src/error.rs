use std::{fmt::Display, io};

use dfu::DfuError;

/// sysexits.h `EX_IOERR`, used when a device is left in an unknown state
const EX_IOERR: u8 = 74;

pub enum CliError {
    IO(io::Error),
    Dfu(DfuError),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::IO(_) => 1,
            CliError::Dfu(err) if err.is_fatal() => EX_IOERR,
            CliError::Dfu(err) => u8::try_from(err.code()).unwrap_or(1),
        }
    }
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        CliError::IO(value)
    }
}

impl From<DfuError> for CliError {
    fn from(value: DfuError) -> Self {
        CliError::Dfu(value)
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::IO(err) => write!(f, "IO error: {err}"),
            CliError::Dfu(err) => write!(f, "DFU error: {err}"),
        }
    }
}
