use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockFileError {
    #[error("Invalid layout configuration: {0}")]
    Configuration(String),

    #[error("File header corrupt: neither header copy passed checksum validation")]
    HeaderCorrupt,

    #[error("Segment {0} corrupt: neither free map copy passed checksum validation")]
    SegmentCorrupt(u64),

    #[error("Segment count mismatch: header declares {stored}, file size implies {computed}")]
    SizeMismatch { stored: u64, computed: u64 },

    #[error("File too small: {size} bytes, header region needs {required}")]
    FileTooSmall { size: u64, required: u64 },

    #[error("Handle field {field} out of range: {value} (max {max})")]
    InvalidHandleField {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Invalid release: {0}")]
    InvalidRelease(String),

    #[error("Application data too large: {len} bytes (max {max})")]
    AppDataTooLarge { len: usize, max: usize },

    #[error("Buffer too large: {len} bytes (max {max} per handle)")]
    BufferTooLarge { len: usize, max: u64 },

    #[error("Unsupported handle width for binary encoding: {0} bits")]
    UnsupportedHandleWidth(u32),

    #[error("Block file is not open")]
    NotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, BlockFileError>;
