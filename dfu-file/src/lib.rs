//! DFU firmware files: raw images with an optional DFU suffix
//! (DFU 1.1, appendix B) carrying the target vendor / product IDs.

use log::{debug, warn};

pub const DFU_SUFFIX_LEN: usize = 16;
pub const DFU_SUFFIX_SIGNATURE: &[u8; 3] = b"UFD";

/// "any vendor / product / device version"
pub const WILDCARD_ID: u16 = 0xffff;

/// How to treat a DFU suffix at the end of the file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuffixPolicy {
    /// A valid suffix is required
    Needs,
    /// Use the suffix if there is one
    Maybe,
    /// The whole file is payload
    No,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfuSuffix {
    pub device: u16,
    pub product: u16,
    pub vendor: u16,
    pub dfu_version: u16,
    pub length: u8,
    pub crc: u32,
}

#[derive(Debug)]
pub enum DfuFileError {
    MissingSuffix,
    InvalidSuffixLength(u8),
    BadCrc { expected: u32, actual: u32 },
}

impl std::error::Error for DfuFileError {}

impl std::fmt::Display for DfuFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuFileError::MissingSuffix => {
                write!(f, "Valid DFU suffix needed")
            }
            DfuFileError::InvalidSuffixLength(len) => {
                write!(f, "Unsupported DFU suffix length {len}")
            }
            DfuFileError::BadCrc { expected, actual } => write!(
                f,
                "DFU suffix CRC does not match (file {expected:#010x}, computed {actual:#010x})"
            ),
        }
    }
}

/// A firmware image and its suffix metadata
pub struct DfuFile {
    data: Vec<u8>,
    payload_len: usize,
    suffix: Option<DfuSuffix>,
}

impl DfuFile {
    pub fn load(
        data: Vec<u8>,
        policy: SuffixPolicy,
    ) -> Result<Self, DfuFileError> {
        let suffix = match policy {
            SuffixPolicy::No => None,
            SuffixPolicy::Maybe | SuffixPolicy::Needs => parse_suffix(&data)?,
        };

        if suffix.is_none() {
            if policy == SuffixPolicy::Needs {
                return Err(DfuFileError::MissingSuffix);
            }
            if policy == SuffixPolicy::Maybe {
                warn!("No valid DFU suffix signature");
            }
        }

        let payload_len =
            data.len() - suffix.map_or(0, |s| s.length as usize);
        debug!("Firmware payload: {payload_len} bytes, suffix: {suffix:?}");
        Ok(DfuFile {
            data,
            payload_len,
            suffix,
        })
    }

    pub fn suffix(&self) -> Option<&DfuSuffix> {
        self.suffix.as_ref()
    }

    /// Target vendor ID, [WILDCARD_ID] if unspecified
    pub fn vendor_id(&self) -> u16 {
        self.suffix.map_or(WILDCARD_ID, |s| s.vendor)
    }

    /// Target product ID, [WILDCARD_ID] if unspecified
    pub fn product_id(&self) -> u16 {
        self.suffix.map_or(WILDCARD_ID, |s| s.product)
    }

    pub fn device_version(&self) -> u16 {
        self.suffix.map_or(WILDCARD_ID, |s| s.device)
    }

    /// Firmware bytes to be downloaded, without suffix
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.payload_len]
    }

    pub fn len(&self) -> usize {
        self.payload_len
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }
}

/// CRC stored in a DFU suffix: CRC-32 without the final inversion
pub fn suffix_crc(data: &[u8]) -> u32 {
    !crc32fast::hash(data)
}

fn extract_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn parse_suffix(data: &[u8]) -> Result<Option<DfuSuffix>, DfuFileError> {
    if data.len() < DFU_SUFFIX_LEN {
        return Ok(None);
    }
    let raw = &data[data.len() - DFU_SUFFIX_LEN..];
    if &raw[8..11] != DFU_SUFFIX_SIGNATURE {
        return Ok(None);
    }

    let suffix = DfuSuffix {
        device: extract_u16(raw, 0),
        product: extract_u16(raw, 2),
        vendor: extract_u16(raw, 4),
        dfu_version: extract_u16(raw, 6),
        length: raw[11],
        crc: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
    };

    if (suffix.length as usize) < DFU_SUFFIX_LEN
        || suffix.length as usize > data.len()
    {
        return Err(DfuFileError::InvalidSuffixLength(suffix.length));
    }

    let actual = suffix_crc(&data[..data.len() - 4]);
    if actual != suffix.crc {
        return Err(DfuFileError::BadCrc {
            expected: suffix.crc,
            actual,
        });
    }
    Ok(Some(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_suffix(payload: &[u8], vendor: u16, product: u16) -> Vec<u8> {
        let mut data = payload.to_vec();
        data.extend(0x0200u16.to_le_bytes());
        data.extend(product.to_le_bytes());
        data.extend(vendor.to_le_bytes());
        data.extend(0x0100u16.to_le_bytes());
        data.extend(DFU_SUFFIX_SIGNATURE);
        data.push(DFU_SUFFIX_LEN as u8);
        let crc = suffix_crc(&data);
        data.extend(crc.to_le_bytes());
        data
    }

    #[test]
    fn test_suffix_ids() {
        let data = with_suffix(&[1, 2, 3, 4, 5], 0x0483, 0xdf11);
        let file = DfuFile::load(data, SuffixPolicy::Maybe).unwrap();
        assert_eq!(file.vendor_id(), 0x0483);
        assert_eq!(file.product_id(), 0xdf11);
        assert_eq!(file.device_version(), 0x0200);
        assert_eq!(file.payload(), &[1, 2, 3, 4, 5]);
        assert_eq!(file.suffix().unwrap().dfu_version, 0x0100);
    }

    #[test]
    fn test_known_crc() {
        // CRC-32 check value of "123456789" is 0xcbf43926
        assert_eq!(suffix_crc(b"123456789"), !0xcbf43926);
    }

    #[test]
    fn test_missing_suffix() {
        let file = DfuFile::load(vec![0; 32], SuffixPolicy::Maybe).unwrap();
        assert_eq!(file.vendor_id(), WILDCARD_ID);
        assert_eq!(file.product_id(), WILDCARD_ID);
        assert_eq!(file.len(), 32);

        assert!(matches!(
            DfuFile::load(vec![0; 32], SuffixPolicy::Needs),
            Err(DfuFileError::MissingSuffix)
        ));
    }

    #[test]
    fn test_suffix_ignored() {
        let data = with_suffix(&[9; 8], 0x1234, 0x5678);
        let file = DfuFile::load(data, SuffixPolicy::No).unwrap();
        assert_eq!(file.vendor_id(), WILDCARD_ID);
        assert_eq!(file.len(), 8 + DFU_SUFFIX_LEN);
    }

    #[test]
    fn test_corrupted_file() {
        let mut data = with_suffix(&[9; 8], 0x1234, 0x5678);
        data[0] = 0;
        assert!(matches!(
            DfuFile::load(data, SuffixPolicy::Maybe),
            Err(DfuFileError::BadCrc { .. })
        ));
    }
}
