//! Chunked block transfers across many `DFU_DNLOAD` / `DFU_UPLOAD` requests

use std::{
    cmp,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{
    DfuConnection, DfuError,
    status::{DfuState, DfuStatus},
    transport::DfuTransport,
};

/// Extra wait in `dfuMANIFEST-SYNC` / `dfuMANIFEST`, some devices need it
/// before they answer `DFU_GETSTATUS` again
const MANIFEST_SETTLE_TIME: Duration = Duration::from_millis(1000);

/// Give up on a device that stays busy for longer than this
const MAX_BUSY_TIME: Duration = Duration::from_secs(120);

/// Upper bound of an upload without explicit length
pub const MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Download `payload` in blocks of `chunk_size` bytes, then signal the end
/// of the transfer and wait for the manifestation phase to complete.
///
/// `progress` is called with (bytes sent, total bytes) after every block.
pub fn run_download<T: DfuTransport>(
    connection: &DfuConnection<T>,
    chunk_size: u16,
    payload: &[u8],
    mut progress: impl FnMut(usize, usize),
) -> Result<(), DfuError> {
    if chunk_size == 0 {
        return Err(DfuError::TransferSizeUnknown);
    }

    let total = payload.len();
    let mut transaction: u16 = 0;
    let mut bytes_sent: usize = 0;
    progress(0, total);

    for chunk in payload.chunks(chunk_size as usize) {
        connection.download(transaction, chunk)?;
        transaction = transaction.wrapping_add(1);

        let st = wait_while_busy(connection)?;
        if !st.status().is_ok() {
            error!("Download failed! {st}");
            return Err(DfuError::from(&st));
        }

        bytes_sent += chunk.len();
        progress(bytes_sent, total);
    }

    debug!("Sending zero-length download request");
    connection.download(transaction, &[])?;
    wait_manifestation(connection)
}

/// Poll until the device has processed the last block
fn wait_while_busy<T: DfuTransport>(
    connection: &DfuConnection<T>,
) -> Result<DfuStatus, DfuError> {
    let start = Instant::now();
    loop {
        let st = connection.get_status()?;
        if matches!(st.state(), DfuState::DfuDownloadIdle | DfuState::DfuError)
        {
            return Ok(st);
        }
        st.wait();
        if start.elapsed() >= MAX_BUSY_TIME {
            return Err(DfuError::Timeout);
        }
    }
}

fn wait_manifestation<T: DfuTransport>(
    connection: &DfuConnection<T>,
) -> Result<(), DfuError> {
    let start = Instant::now();
    loop {
        let st = match connection.get_status() {
            Ok(st) => st,
            Err(err) if !connection.descriptor().manifestation_tolerant() => {
                // device resets itself after manifestation
                info!("Device left during manifestation ({err})");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        st.wait();

        match st.state() {
            DfuState::DfuManifestSync | DfuState::DfuManifest => {
                std::thread::sleep(MANIFEST_SETTLE_TIME);
            }
            DfuState::DfuIdle | DfuState::DfuManifestWaitReset => {
                info!("Download done ({st})");
                return st.ok();
            }
            DfuState::DfuError => {
                error!("Manifestation failed! {st}");
                return Err(DfuError::from(&st));
            }
            other => {
                warn!("Unexpected state after download: {other}");
                return st.ok();
            }
        }

        if start.elapsed() >= MAX_BUSY_TIME {
            return Err(DfuError::Timeout);
        }
    }
}

/// Upload firmware in blocks of `chunk_size` bytes until the device sends a
/// short block or `limit` bytes have been read.
///
/// Without `limit`, a device that never sends a short block fails with
/// [DfuError::UploadTooLarge] after [MAX_UPLOAD_SIZE] bytes.
///
/// `progress` is called with (bytes read, limit or 0) after every block.
pub fn run_upload<T: DfuTransport>(
    connection: &DfuConnection<T>,
    chunk_size: u16,
    limit: Option<usize>,
    progress: impl FnMut(usize, usize),
) -> Result<Vec<u8>, DfuError> {
    upload_blocks(connection, chunk_size, limit, MAX_UPLOAD_SIZE, progress)
}

fn upload_blocks<T: DfuTransport>(
    connection: &DfuConnection<T>,
    chunk_size: u16,
    limit: Option<usize>,
    max_size: usize,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<u8>, DfuError> {
    if chunk_size == 0 {
        return Err(DfuError::TransferSizeUnknown);
    }
    connection.abort_to_idle()?;

    let total = limit.unwrap_or(0);
    let mut data: Vec<u8> = Vec::new();
    let mut transaction: u16 = 0;

    loop {
        let remaining = match limit {
            Some(limit) => limit - data.len(),
            None if data.len() >= max_size => {
                connection.abort_to_idle()?;
                return Err(DfuError::UploadTooLarge(max_size));
            }
            None => usize::MAX,
        };
        if remaining == 0 {
            // device still expects more requests
            connection.abort_to_idle()?;
            break;
        }
        let length = cmp::min(remaining, chunk_size as usize) as u16;
        let block = connection.upload(transaction, length)?;
        transaction = transaction.wrapping_add(1);

        let short = block.len() < length as usize;
        data.extend(block);
        progress(data.len(), total);
        if short {
            break;
        }
    }

    info!("Upload done ({} bytes)", data.len());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::{DfuDescriptor, DfuStatusCode, Quirks};

    fn dnload(block: u16, data: &[u8]) -> Request {
        Request::out(1, block, data)
    }

    const GETSTATUS: Request = Request::input(3, 0, 6);

    #[test]
    fn test_download_in_chunks() {
        let script = Script::new();
        script.push_status(0, DfuState::DfuDownloadBusy);
        script.push_status(0, DfuState::DfuDownloadIdle);
        script.push_status(0, DfuState::DfuDownloadIdle);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());

        let mut reports = Vec::new();
        run_download(&conn, 4, &[1, 2, 3, 4, 5, 6], |done, total| {
            reports.push((done, total))
        })
        .unwrap();

        assert_eq!(reports, vec![(0, 6), (4, 6), (6, 6)]);
        assert_eq!(
            script.requests(),
            vec![
                dnload(0, &[1, 2, 3, 4]),
                GETSTATUS,
                GETSTATUS,
                dnload(1, &[5, 6]),
                GETSTATUS,
                dnload(2, &[]),
                GETSTATUS,
            ]
        );
    }

    #[test]
    fn test_download_error_status() {
        let script = Script::new();
        script.push_status(0x03, DfuState::DfuError);
        let conn = connection(&script, Quirks::empty());

        let err = run_download(&conn, 4, &[0; 8], |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            DfuError::Status {
                status: DfuStatusCode::ErrWrite,
                state: DfuState::DfuError
            }
        ));
        assert_eq!(script.requests(), vec![dnload(0, &[0; 4]), GETSTATUS]);
    }

    #[test]
    fn test_download_manifestation_reset() {
        let script = Script::new();
        script.push_status(0, DfuState::DfuDownloadIdle);
        script.push_error();
        let desc =
            DfuDescriptor::parse(&[0x09, 0x21, 0x03, 0, 0, 0x40, 0, 0x10, 0x01])
                .unwrap();
        assert!(!desc.manifestation_tolerant());
        let conn = DfuConnection::new(
            transport(&script),
            0,
            desc,
            64,
            (0x0483, 0xdf11),
            Quirks::empty(),
        );
        run_download(&conn, 64, &[0; 10], |_, _| {}).unwrap();
    }

    #[test]
    fn test_download_requires_chunk_size() {
        let script = Script::new();
        let conn = connection(&script, Quirks::empty());
        assert!(matches!(
            run_download(&conn, 0, &[0; 10], |_, _| {}),
            Err(DfuError::TransferSizeUnknown)
        ));
        assert!(script.requests().is_empty());
    }

    #[test]
    fn test_upload_until_short_block() {
        let script = Script::new();
        script.push_status(0, DfuState::DfuIdle);
        script.push_in(vec![0xaa; 4]);
        script.push_in(vec![0xbb; 2]);
        let conn = connection(&script, Quirks::empty());

        let data = run_upload(&conn, 4, None, |_, _| {}).unwrap();
        assert_eq!(data, vec![0xaa, 0xaa, 0xaa, 0xaa, 0xbb, 0xbb]);
        assert_eq!(
            script.requests(),
            vec![
                Request::out(6, 0, &[]),
                GETSTATUS,
                Request::input(2, 0, 4),
                Request::input(2, 1, 4),
            ]
        );
    }

    #[test]
    fn test_upload_with_limit() {
        let script = Script::new();
        script.push_status(0, DfuState::DfuIdle);
        script.push_in(vec![1; 4]);
        script.push_in(vec![2; 2]);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());

        let data = run_upload(&conn, 4, Some(6), |_, _| {}).unwrap();
        assert_eq!(data.len(), 6);
        let requests = script.requests();
        assert_eq!(requests[3], Request::input(2, 1, 2));
        assert_eq!(requests[4], Request::out(6, 0, &[]));
    }

    #[test]
    fn test_upload_without_limit_is_bounded() {
        let script = Script::new();
        script.push_status(0, DfuState::DfuIdle);
        script.push_in(vec![1; 4]);
        script.push_in(vec![2; 4]);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());

        let err = upload_blocks(&conn, 4, None, 8, |_, _| {}).unwrap_err();
        assert!(matches!(err, DfuError::UploadTooLarge(8)));
        assert_eq!(script.requests().len(), 6);
        assert_eq!(script.requests()[5], GETSTATUS);
    }
}
