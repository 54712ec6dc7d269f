//! # blockfile-rs - Embeddable Block Storage
//!
//! `blockfile-rs` stores byte buffers in a single file made of fixed-size
//! blocks. Every stored buffer is addressed by a compact [`Handle`] naming a
//! segment, a start block and a span; the engine takes care of allocation,
//! free space bookkeeping and crash-resilient metadata.
//!
//! - **Configurable geometry**: block size, free map size, handle width and
//!   span width all come from a small [`LayoutConfig`]
//! - **Compact handles**: pack into a single `u32` for the default layout
//! - **Coalescing allocator**: span-indexed free lists per segment
//! - **Dual-copy metadata**: every header is written twice and checksummed;
//!   a damaged copy is repaired from its twin on open
//! - **Automatic growth**: segments are appended when existing ones are full
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockfile_rs::{BlockFile, Handle, LayoutConfig, Result};
//!
//! # fn main() -> Result<()> {
//! // Creates the file with the default layout if it does not exist
//! let mut file = BlockFile::open("data.blk", LayoutConfig::default())?;
//!
//! // Store a buffer and keep its handle
//! let handle = file.store(b"Hello, blocks!", None)?;
//!
//! // Handles have a text form that survives a round trip
//! let saved = handle.to_string();
//!
//! // Load the full run back (padded to whole blocks)
//! let data = file.load(&saved.parse::<Handle>()?)?;
//! assert_eq!(&data[..14], b"Hello, blocks!");
//!
//! file.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use blockfile_rs::{BlockFileBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! // 1 KiB blocks, 64-bit handles, spans of up to 256 blocks
//! let mut file = BlockFileBuilder::new()
//!     .path("/data/archive.blk")
//!     .block_size_exp(10)
//!     .free_map_size_exp(13)
//!     .checksum_bits(32)
//!     .handle_bits(64)
//!     .span_bits(8)
//!     .create_new(true)
//!     .build()?;
//!
//! file.set_app_data(b"root=0/0/0".to_vec())?;
//! file.flush()?;
//! # Ok(())
//! # }
//! ```

// Core implementation
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{
    allocator, block_file, checksum, error, handle, header, io, layout, segment,
};

// Re-export core types that users need
pub use crate::core::{
    allocator::{bitmap::FreeBlockMap, span::SpanAllocator, BlockAllocator},
    block_file::{BlockFile, BlockFileStats, FileState},
    checksum::ChecksumWidth,
    error::{BlockFileError, Result},
    handle::Handle,
    header::FileHeader,
    layout::{Layout, LayoutConfig},
    segment::Segment,
};

use std::path::{Path, PathBuf};
use tracing::info;

/// Builder for opening or creating a BlockFile
///
/// # Examples
///
/// ```rust,no_run
/// use blockfile_rs::BlockFileBuilder;
///
/// let file = BlockFileBuilder::new()
///     .path("cache.blk")
///     .block_size_exp(13)
///     .build()?;
/// # Ok::<(), blockfile_rs::BlockFileError>(())
/// ```
pub struct BlockFileBuilder {
    path: Option<PathBuf>,
    config: LayoutConfig,
    create_new: bool,
}

impl BlockFileBuilder {
    /// Create a new BlockFileBuilder with the default layout
    pub fn new() -> Self {
        BlockFileBuilder {
            path: None,
            config: LayoutConfig::default(),
            create_new: false,
        }
    }

    /// Set the file path (required)
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Replace the whole layout config
    pub fn layout(mut self, config: LayoutConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the layout config from a TOML file
    pub fn layout_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.config = LayoutConfig::from_toml_file(path)?;
        Ok(self)
    }

    pub fn block_size_exp(mut self, exp: u32) -> Self {
        self.config.block_size_exp = exp;
        self
    }

    pub fn free_map_size_exp(mut self, exp: u32) -> Self {
        self.config.free_map_size_exp = Some(exp);
        self
    }

    pub fn checksum_bits(mut self, bits: u32) -> Self {
        self.config.checksum_bits = bits;
        self
    }

    pub fn checksum_offset(mut self, offset: u32) -> Self {
        self.config.checksum_offset = offset;
        self
    }

    pub fn handle_bits(mut self, bits: u32) -> Self {
        self.config.handle_bits = bits;
        self
    }

    pub fn span_bits(mut self, bits: u32) -> Self {
        self.config.span_bits = bits;
        self
    }

    /// Fail instead of opening when the file already exists
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Open or create the BlockFile
    pub fn build(self) -> Result<BlockFile> {
        let path = self.path.ok_or_else(|| {
            BlockFileError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path must be set",
            ))
        })?;

        info!(
            "Building block file at {} (create_new: {})",
            path.display(),
            self.create_new
        );

        if self.create_new {
            BlockFile::create(&path, self.config)
        } else {
            BlockFile::open(&path, self.config)
        }
    }
}

impl Default for BlockFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
