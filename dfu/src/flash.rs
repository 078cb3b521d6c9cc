use std::{
    path::Path,
    sync::atomic::{AtomicI8, AtomicU8, Ordering},
};

use dfu_file::{DfuFile, SuffixPolicy, WILDCARD_ID};
use log::{error, info};

use crate::{
    DfuConnection, DfuDevice, DfuError, MatchCriteria, NusbBackend,
    UsbBackend, run_download, run_upload,
    status::DfuStatus,
};

/// Outcome flag of a flash operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Finished {
    Pending,
    Success,
    Failure,
}

impl Finished {
    /// -1 on failure, 0 while pending, 1 on success
    pub fn as_i32(&self) -> i32 {
        match self {
            Finished::Pending => 0,
            Finished::Success => 1,
            Finished::Failure => -1,
        }
    }
}

/// Progress of a flash operation, readable from another thread
#[derive(Debug, Default)]
pub struct FlashStatus {
    progress: AtomicU8,
    finished: AtomicI8,
}

impl FlashStatus {
    pub fn new() -> Self {
        FlashStatus::default()
    }

    /// Percentage of the firmware downloaded so far
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> Finished {
        match self.finished.load(Ordering::Acquire) {
            0 => Finished::Pending,
            1 => Finished::Success,
            _ => Finished::Failure,
        }
    }

    fn start(&self) {
        self.progress.store(0, Ordering::Relaxed);
        self.finished.store(0, Ordering::Release);
    }

    fn update(&self, done: usize, total: usize) {
        let percent = if total == 0 { 100 } else { done * 100 / total };
        self.progress.store(percent.min(100) as u8, Ordering::Relaxed);
    }

    fn finish(&self, success: bool) {
        let flag = if success {
            Finished::Success
        } else {
            Finished::Failure
        };
        self.finished.store(flag.as_i32() as i8, Ordering::Release);
    }
}

#[derive(Clone, Debug)]
pub struct FlashOptions {
    pub criteria: MatchCriteria,
    /// Transfer size to use instead of the device's `wTransferSize`
    pub transfer_size: Option<u16>,
    pub suffix_policy: SuffixPolicy,
}

impl Default for FlashOptions {
    fn default() -> Self {
        FlashOptions {
            criteria: MatchCriteria::default(),
            transfer_size: None,
            suffix_policy: SuffixPolicy::Maybe,
        }
    }
}

/// Pick the block size of a transfer.
///
/// An explicitly requested size wins over the device's `wTransferSize`;
/// one of both is required. The result is never below the control
/// endpoint's packet size.
pub fn negotiate_transfer_size(
    descriptor_size: u16,
    requested: Option<u16>,
    max_packet_size: u8,
) -> Result<u16, DfuError> {
    let size = match requested {
        Some(size) if size > 0 => size,
        _ if descriptor_size > 0 => descriptor_size,
        _ => return Err(DfuError::TransferSizeUnknown),
    };
    // raised, not capped, to bMaxPacketSize0
    Ok(size.max(max_packet_size as u16))
}

/// Reject a firmware file that names another device
pub(crate) fn check_ids<H>(
    file_ids: (u16, u16),
    device: &DfuDevice<H>,
) -> Result<(), DfuError> {
    let (vendor, product) = file_ids;
    if (vendor != WILDCARD_ID && vendor != device.vendor_id())
        || (product != WILDCARD_ID && product != device.product_id())
    {
        return Err(DfuError::IdMismatch {
            file: file_ids,
            device: (device.vendor_id(), device.product_id()),
        });
    }
    Ok(())
}

/// Flash orchestration over a [UsbBackend]
pub struct Flasher<B: UsbBackend = NusbBackend> {
    backend: B,
    options: FlashOptions,
}

impl<B: UsbBackend> Flasher<B> {
    pub fn new(backend: B, options: FlashOptions) -> Self {
        Flasher { backend, options }
    }

    /// Download the firmware file at `path`
    pub fn flash_file(
        &self,
        path: impl AsRef<Path>,
        status: &FlashStatus,
        on_progress: impl FnMut(usize, usize),
    ) -> Result<(), DfuError> {
        status.start();
        match std::fs::read(path) {
            Ok(data) => self.flash(data, status, on_progress),
            Err(err) => {
                error!("Cannot read firmware file: {err}");
                status.finish(false);
                Err(err.into())
            }
        }
    }

    /// Download a firmware image to the single matching device.
    ///
    /// `status` is set to [Finished::Success] or [Finished::Failure] before
    /// returning; the device is released on every path.
    pub fn flash(
        &self,
        data: Vec<u8>,
        status: &FlashStatus,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<(), DfuError> {
        status.start();
        let result = self.try_flash(data, |done, total| {
            status.update(done, total);
            on_progress(done, total);
        });
        if let Err(err) = &result {
            error!("Flash failed: {err}");
        }
        status.finish(result.is_ok());
        result
    }

    fn try_flash(
        &self,
        data: Vec<u8>,
        on_progress: impl FnMut(usize, usize),
    ) -> Result<(), DfuError> {
        let file = DfuFile::load(data, self.options.suffix_policy)?;
        let file_ids = (file.vendor_id(), file.product_id());
        let criteria = self
            .options
            .criteria
            .with_firmware_ids(file_ids.0, file_ids.1);

        let device = self.select(&criteria)?;
        check_ids(file_ids, &device)?;

        let connection = self.open(&device)?;
        connection.reset_state()?;

        let chunk_size = negotiate_transfer_size(
            connection.transfer_size(),
            self.options.transfer_size,
            connection.max_packet_size(),
        )?;
        info!(
            "Downloading {} bytes in blocks of {chunk_size} bytes",
            file.len()
        );

        run_download(&connection, chunk_size, file.payload(), on_progress)
            .map_err(|err| DfuError::Download(Box::new(err)))
    }

    /// Read the firmware of the single matching device, up to `limit` bytes
    pub fn upload(
        &self,
        limit: Option<usize>,
        on_progress: impl FnMut(usize, usize),
    ) -> Result<Vec<u8>, DfuError> {
        let device = self.select(&self.options.criteria)?;
        let connection = self.open(&device)?;
        connection.reset_state()?;

        let chunk_size = negotiate_transfer_size(
            connection.transfer_size(),
            self.options.transfer_size,
            connection.max_packet_size(),
        )?;
        run_upload(&connection, chunk_size, limit, on_progress)
    }

    /// Ask the single matching runtime mode device to enter DFU mode
    pub fn detach(&self, timeout_ms: u16) -> Result<(), DfuError> {
        let device = self.select(&self.options.criteria)?;
        if device.is_dfu_mode() {
            info!("Device is already in DFU mode");
            return Ok(());
        }
        let connection = self.open(&device)?;
        connection.detach(timeout_ms)?;
        if !device.descriptor().will_detach() {
            info!("Device does not detach by itself, it needs a USB reset");
        }
        Ok(())
    }

    /// Current status of the single matching device
    pub fn status(&self) -> Result<DfuStatus, DfuError> {
        let device = self.select(&self.options.criteria)?;
        self.open(&device)?.get_status()
    }

    /// Exactly one device must match: a bus reset during DFU gives the
    /// device a new address, so several candidates cannot be told apart
    /// afterwards.
    fn select(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<DfuDevice<B::Handle>, DfuError> {
        let mut devices = self.backend.probe(criteria)?;
        match devices.len() {
            0 => Err(DfuError::NoDevice),
            1 => Ok(devices.remove(0)),
            count => Err(DfuError::ManyDevices(count)),
        }
    }

    fn open(
        &self,
        device: &DfuDevice<B::Handle>,
    ) -> Result<DfuConnection<B::Transport>, DfuError> {
        let transport = self.backend.open(device)?;
        info!(
            "Opened DFU device {:04x}:{:04x} (intf={}, alt={})",
            device.vendor_id(),
            device.product_id(),
            device.interface(),
            device.alt_setting()
        );
        Ok(device.connection(transport))
    }
}
