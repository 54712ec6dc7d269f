use crate::checksum::{self, ChecksumWidth};
use crate::error::{BlockFileError, Result};
use crate::layout::{Layout, LayoutConfig, HEADER_FIXED_BYTES};

pub const CHECKSUM_OFFSET: usize = 0;
pub const SEGMENT_COUNT_OFFSET: usize = 4;
pub const CONFIG_LEN_OFFSET: usize = 12;
pub const CONFIG_OFFSET: usize = 14;

/// Header copies are always protected by CRC-32, whatever the free map uses
pub const HEADER_CHECKSUM: ChecksumWidth = ChecksumWidth::Bits32;

/// Block file header
///
/// Two identical copies occupy the first two blocks of the file. Each copy
/// is exactly one block long:
///
/// ```text
/// 0       4              12          14            14+n        16+n
/// | crc32 | segment count | config len | config json | app len | app data | 0..
/// ```
///
/// All integers are big-endian. The checksum covers the whole copy with the
/// checksum field zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Number of segments in the file
    pub segment_count: u64,

    /// Layout the file was created with
    pub config: LayoutConfig,

    app_data: Vec<u8>,
}

impl FileHeader {
    pub fn new(layout: &Layout) -> Self {
        FileHeader {
            segment_count: 0,
            config: *layout.config(),
            app_data: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        1usize << self.config.block_size_exp
    }

    pub fn app_data(&self) -> &[u8] {
        &self.app_data
    }

    /// Largest app-data blob that fits in one header copy
    pub fn max_app_data_len(&self) -> Result<usize> {
        let config_len = self.config.to_json()?.len();
        let room = self
            .block_size()
            .saturating_sub(HEADER_FIXED_BYTES + config_len);
        Ok(room.min(u16::MAX as usize))
    }

    /// Replace the app-data blob; oversize data is rejected, never truncated
    pub fn set_app_data(&mut self, data: Vec<u8>) -> Result<()> {
        let max = self.max_app_data_len()?;
        if data.len() > max {
            return Err(BlockFileError::AppDataTooLarge {
                len: data.len(),
                max,
            });
        }
        self.app_data = data;
        Ok(())
    }

    /// Serialize one signed header copy
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let config = self.config.to_json()?;
        let max = self.max_app_data_len()?;
        if self.app_data.len() > max {
            return Err(BlockFileError::AppDataTooLarge {
                len: self.app_data.len(),
                max,
            });
        }

        let mut bytes = Vec::with_capacity(self.block_size());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&self.segment_count.to_be_bytes());
        bytes.extend_from_slice(&(config.len() as u16).to_be_bytes());
        bytes.extend_from_slice(config.as_bytes());
        bytes.extend_from_slice(&(self.app_data.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.app_data);

        // Pad to one block
        bytes.resize(self.block_size(), 0);

        checksum::sign(&mut bytes, CHECKSUM_OFFSET, HEADER_CHECKSUM);
        Ok(bytes)
    }

    /// Parse and validate one header copy
    ///
    /// Fails with [`BlockFileError::HeaderCorrupt`] when the checksum does not
    /// match or the contents are inconsistent with the copy's length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONFIG_OFFSET || !checksum::verify(bytes, CHECKSUM_OFFSET, HEADER_CHECKSUM)
        {
            return Err(BlockFileError::HeaderCorrupt);
        }

        let config = Self::peek_config(bytes).ok_or(BlockFileError::HeaderCorrupt)?;
        let layout = Layout::new(config)?;
        if bytes.len() as u64 != layout.block_size() {
            return Err(BlockFileError::HeaderCorrupt);
        }

        let segment_count = u64::from_be_bytes(
            bytes[SEGMENT_COUNT_OFFSET..SEGMENT_COUNT_OFFSET + 8]
                .try_into()
                .map_err(|_| BlockFileError::HeaderCorrupt)?,
        );

        let config_len = read_u16(bytes, CONFIG_LEN_OFFSET).ok_or(BlockFileError::HeaderCorrupt)?;
        let app_len_offset = CONFIG_OFFSET + config_len;
        let app_len = read_u16(bytes, app_len_offset).ok_or(BlockFileError::HeaderCorrupt)?;
        let app_offset = app_len_offset + 2;
        let app_data = bytes
            .get(app_offset..app_offset + app_len)
            .ok_or(BlockFileError::HeaderCorrupt)?
            .to_vec();

        Ok(FileHeader {
            segment_count,
            config: *layout.config(),
            app_data,
        })
    }

    /// Read the layout config out of a header prefix without checking the
    /// checksum
    ///
    /// Opening a file needs the block size before it can read a whole copy.
    pub fn peek_config(prefix: &[u8]) -> Option<LayoutConfig> {
        let len = read_u16(prefix, CONFIG_LEN_OFFSET)?;
        let json = prefix.get(CONFIG_OFFSET..CONFIG_OFFSET + len)?;
        let text = std::str::from_utf8(json).ok()?;
        LayoutConfig::from_json(text).ok()
    }

    /// Length of the config text declared in a header prefix
    pub fn peek_config_len(prefix: &[u8]) -> Option<usize> {
        read_u16(prefix, CONFIG_LEN_OFFSET)
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<usize> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]) as usize)
}
