//! USB Device Firmware Upgrade (DFU) host implementation based on [`nusb`]
//!
//! Drives a DFU capable device through the DFU state machine to transfer
//! firmware images in or out of it. The crate is organised in layers:
//!
//! - [`status`]: decoding of `DFU_GETSTATUS` replies and the state / status
//!   name tables,
//! - [`DfuConnection`]: one claimed DFU interface and the seven DFU class
//!   requests, plus the recovery state machine that brings a device back
//!   to `dfuIDLE`,
//! - [`find_dfu_devices`] / [`NusbBackend`]: device discovery and opening,
//! - [`Flasher`]: the top level flash orchestration.
//!
//! Useful references:
//! - DFU: [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//!
//! # Example
//!
//! The following example shows how to obtain a `Vec` of [DfuDevice]:
//! ```no_run
//! use dfu::{MatchCriteria, find_dfu_devices};
//!
//! match find_dfu_devices(&MatchCriteria::default()) {
//!     Ok(devices) => {
//!         if devices.is_empty() {
//!             println!("No DFU devices found");
//!         } else {
//!             println!("Found {} DFU interfaces", devices.len());
//!         }
//!     }
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

/// Default timeout of a single control transfer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);

/// Poll timeout used instead of `bwPollTimeout` for devices with
/// [`Quirks::POLL_TIMEOUT`]
pub const DEFAULT_POLL_TIMEOUT: u32 = 5;

/// Upper bound of `DFU_GETSTATUS` rounds while bringing a device to `dfuIDLE`
pub const MAX_RECOVERY_POLLS: usize = 16;

mod backend;
mod connection;
mod descriptor;
mod device;
mod error;
mod flash;
mod quirks;
mod recovery;
pub mod status;
mod transfer;
mod transport;

#[cfg(test)]
mod testing;

use std::time::Duration;

// Re-exports
pub use backend::{NusbBackend, UsbBackend};
pub use connection::DfuConnection;
pub use descriptor::DfuDescriptor;
pub use device::{DfuDevice, MatchCriteria, find_dfu_devices};
pub use error::DfuError;
pub use flash::{
    FlashOptions, FlashStatus, Flasher, Finished, negotiate_transfer_size,
};
pub use quirks::Quirks;
pub use status::{DfuState, DfuStatus, DfuStatusCode, state_name, status_message};
pub use transfer::{MAX_UPLOAD_SIZE, run_download, run_upload};
pub use transport::{DfuTransport, UsbTransport};
