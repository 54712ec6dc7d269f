//! Main BlockFile API
//!
//! Ties the layout, segments and file header together into a single file of
//! addressable block runs.
//!
//! ## File layout
//!
//! ```text
//! | header (primary) | header (secondary) | segment 0 | segment 1 | ...
//!
//! segment n:
//! | free map (primary) | free map (secondary) | block 0 | block 1 | ...
//! ```
//!
//! Metadata is always written twice. On open, a copy that fails its checksum
//! is restored from its twin; only when both copies are bad does open fail.
//! Flushing writes dirty segment headers from the highest segment down and
//! the file header last, so the header never counts a segment whose free map
//! has not reached the disk.

use crate::allocator::bitmap::FreeBlockMap;
use crate::error::{BlockFileError, Result};
use crate::handle::Handle;
use crate::header::{FileHeader, CONFIG_OFFSET};
use crate::io::StorageFile;
use crate::layout::{Layout, LayoutConfig};
use crate::segment::Segment;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of an opened block file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Open,
    Closing,
    Closed,
    Failed,
}

/// Block file statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFileStats {
    pub segments: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub used_blocks: u64,
}

/// Block file
///
/// Mutating operations take `&mut self`. Loads only need `&self`: the file
/// handle sits behind a mutex so concurrent readers can share an instance.
pub struct BlockFile {
    path: PathBuf,

    /// Disk-backed storage - interior mutability for concurrent loads
    file: Mutex<StorageFile>,

    layout: Arc<Layout>,

    header: FileHeader,

    /// Indexed by segment number
    segments: Vec<Segment>,

    state: FileState,
}

impl BlockFile {
    /// Create a new block file
    ///
    /// Fails if a file already exists at `path`.
    pub fn create<P: AsRef<Path>>(path: P, config: LayoutConfig) -> Result<Self> {
        let layout = Layout::new(config)?;
        Self::write_new(path.as_ref(), &layout)?;
        Self::open(path, config)
    }

    /// Open a block file, creating it with `config` if it does not exist
    ///
    /// For an existing file the stored layout wins; `config` is only used as
    /// a hint for locating the secondary header copy.
    pub fn open<P: AsRef<Path>>(path: P, config: LayoutConfig) -> Result<Self> {
        let path = path.as_ref();
        let hint = Layout::new(config)?;

        let mut file = match StorageFile::open(path) {
            Ok(file) => file,
            Err(BlockFileError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Self::write_new(path, &hint)?;
                StorageFile::open(path)?
            }
            Err(e) => return Err(e),
        };

        let header = Self::read_file_header(&mut file, &hint)?;
        let layout = Arc::new(Layout::new(header.config)?);
        if *layout != hint {
            debug!(
                "Using stored layout for {} instead of the requested one",
                path.display()
            );
        }

        let size = file.len()?;
        if size < layout.file_header_size() {
            return Err(BlockFileError::FileTooSmall {
                size,
                required: layout.file_header_size(),
            });
        }

        let computed = layout.segments_for_file_size(size);
        if computed != header.segment_count {
            return Err(BlockFileError::SizeMismatch {
                stored: header.segment_count,
                computed,
            });
        }

        let mut segments = Vec::with_capacity(header.segment_count as usize);
        for segment_number in 0..header.segment_count {
            segments.push(Self::read_segment(&mut file, segment_number, &layout)?);
        }

        info!(
            "Opened block file {} ({} segments, {} byte blocks)",
            path.display(),
            segments.len(),
            layout.block_size()
        );

        Ok(BlockFile {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            layout,
            header,
            segments,
            state: FileState::Open,
        })
    }

    /// Exclusively create the file and write both header copies
    fn write_new(path: &Path, layout: &Layout) -> Result<()> {
        let mut file = StorageFile::create_new(path)?;
        let bytes = FileHeader::new(layout).to_bytes()?;

        file.write_at(layout.header_primary_offset(), &bytes)?;
        file.write_at(layout.header_secondary_offset(), &bytes)?;
        file.sync()?;

        info!("Created block file {}", path.display());
        Ok(())
    }

    /// Read the file header, falling back to the secondary copy
    ///
    /// The block size (and so the secondary copy's offset) is only known
    /// after parsing a header, so the secondary is tried at every candidate
    /// block size: the one declared by the primary copy, then the hint's.
    fn read_file_header(file: &mut StorageFile, hint: &Layout) -> Result<FileHeader> {
        let mut block_sizes = Vec::with_capacity(2);

        let prefix = file.read_at(0, CONFIG_OFFSET)?;
        if let Some(config_len) = FileHeader::peek_config_len(&prefix) {
            let prefix = file.read_at(0, CONFIG_OFFSET + config_len)?;
            if let Some(candidate) = FileHeader::peek_config(&prefix)
                .and_then(|config| Layout::new(config).ok())
            {
                let bytes = file.read_at(0, candidate.block_size() as usize)?;
                match FileHeader::from_bytes(&bytes) {
                    Ok(header) => return Ok(header),
                    Err(e) => warn!("Primary file header invalid: {}", e),
                }
                block_sizes.push(candidate.block_size());
            }
        }
        if !block_sizes.contains(&hint.block_size()) {
            block_sizes.push(hint.block_size());
        }

        for block_size in block_sizes {
            let bytes = file.read_at(block_size, block_size as usize)?;
            if let Ok(header) = FileHeader::from_bytes(&bytes) {
                warn!("Restoring primary file header from secondary copy");
                file.write_at(0, &bytes)?;
                file.sync()?;
                return Ok(header);
            }
        }

        Err(BlockFileError::HeaderCorrupt)
    }

    /// Load one segment's free map, falling back to the secondary copy
    fn read_segment(
        file: &mut StorageFile,
        segment_number: u64,
        layout: &Arc<Layout>,
    ) -> Result<Segment> {
        let base = layout.segment_offset(segment_number);
        let size = layout.free_map_size() as usize;

        let primary = FreeBlockMap::from_bytes(
            file.read_at(base + layout.free_map_primary_offset(), size)?,
            layout,
        )?;
        if primary.verify() {
            return Segment::from_free_map(segment_number, primary, layout.clone());
        }

        let secondary = FreeBlockMap::from_bytes(
            file.read_at(base + layout.free_map_secondary_offset(), size)?,
            layout,
        )?;
        if secondary.verify() {
            warn!(
                "Restoring primary free map of segment {} from secondary copy",
                segment_number
            );
            file.write_at(base + layout.free_map_primary_offset(), secondary.as_bytes())?;
            file.sync()?;
            return Segment::from_free_map(segment_number, secondary, layout.clone());
        }

        Err(BlockFileError::SegmentCorrupt(segment_number))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state != FileState::Open {
            return Err(BlockFileError::NotOpen);
        }
        Ok(())
    }

    /// Index of the segment a handle points into
    fn validate_handle(&self, handle: &Handle) -> Result<usize> {
        if !handle.belongs_to(&self.layout) {
            return Err(BlockFileError::InvalidHandle(format!(
                "{} was created for a different layout",
                handle
            )));
        }

        let index = usize::try_from(handle.segment_number())
            .ok()
            .filter(|&i| i < self.segments.len())
            .ok_or_else(|| {
                BlockFileError::InvalidHandle(format!(
                    "segment {} does not exist ({} segments)",
                    handle.segment_number(),
                    self.segments.len()
                ))
            })?;

        if handle.end_block() > self.layout.max_block_number() as u64 {
            return Err(BlockFileError::InvalidHandle(format!(
                "run {}..={} overruns the segment",
                handle.start_block(),
                handle.end_block()
            )));
        }

        Ok(index)
    }

    /// Blocks needed for a buffer; an empty buffer still takes one block
    fn blocks_for(&self, len: usize) -> Result<u32> {
        let blocks = (len as u64).div_ceil(self.layout.block_size()).max(1);
        if blocks > self.layout.span_count() as u64 {
            return Err(BlockFileError::BufferTooLarge {
                len,
                max: self.layout.max_buffer_size(),
            });
        }
        Ok(blocks as u32)
    }

    /// Write a buffer, returning the handle that now holds it
    ///
    /// A supplied handle is overwritten in place when it is large enough;
    /// otherwise new blocks are reserved and the old handle stays allocated
    /// until the caller releases it.
    pub fn store(&mut self, buffer: &[u8], handle: Option<&Handle>) -> Result<Handle> {
        self.ensure_open()?;
        let block_count = self.blocks_for(buffer.len())?;

        let target = match handle {
            Some(existing) => {
                let index = self.validate_handle(existing)?;
                if !self.segments[index].is_reserved(existing) {
                    return Err(BlockFileError::InvalidHandle(format!(
                        "{} is not currently allocated",
                        existing
                    )));
                }
                if existing.size_bytes() >= buffer.len() as u64 {
                    *existing
                } else {
                    self.reserve(block_count)?
                }
            }
            None => self.reserve(block_count)?,
        };

        let offset = self
            .layout
            .block_offset(target.segment_number(), target.start_block());
        self.file.lock().write_at(offset, buffer)?;

        Ok(target)
    }

    /// Read the full run a handle names
    ///
    /// Always returns `size_bytes()` bytes; blocks never written read as
    /// zeros.
    pub fn load(&self, handle: &Handle) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.validate_handle(handle)?;

        let offset = self
            .layout
            .block_offset(handle.segment_number(), handle.start_block());
        self.file.lock().read_at(offset, handle.size_bytes() as usize)
    }

    /// Return a handle's blocks to the free pool
    pub fn release(&mut self, handle: &Handle) -> Result<()> {
        self.ensure_open()?;
        let index = self.validate_handle(handle)?;
        self.segments[index].release(handle)
    }

    /// Reserve `block_count` contiguous blocks, growing the file if needed
    pub fn reserve(&mut self, block_count: u32) -> Result<Handle> {
        self.ensure_open()?;
        if block_count == 0 || block_count > self.layout.span_count() {
            return Err(BlockFileError::InvalidHandleField {
                field: "block_count",
                value: block_count as u64,
                max: self.layout.span_count() as u64,
            });
        }

        for segment in self.segments.iter_mut() {
            if let Some(handle) = segment.reserve(block_count)? {
                return Ok(handle);
            }
        }

        let segment = self.add_segment()?;
        let segment_number = segment.segment_number();
        segment.reserve(block_count)?.ok_or_else(|| {
            BlockFileError::Configuration(format!(
                "fresh segment {} cannot hold {} blocks",
                segment_number, block_count
            ))
        })
    }

    /// Append an empty segment
    ///
    /// The file on disk only grows when the segment is flushed or written to.
    pub fn add_segment(&mut self) -> Result<&mut Segment> {
        self.ensure_open()?;

        let segment_number = self.segments.len() as u64;
        let segment = Segment::new(segment_number, self.layout.clone())?;
        self.segments.push(segment);
        self.header.segment_count = self.segments.len() as u64;

        debug!("Added segment {} to {}", segment_number, self.path.display());

        let index = self.segments.len() - 1;
        Ok(&mut self.segments[index])
    }

    /// Persist dirty segment headers and the file header
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.write_metadata()
    }

    fn write_metadata(&mut self) -> Result<()> {
        let mut file = self.file.lock();

        let mut written = 0;
        for segment in self.segments.iter_mut().rev().filter(|s| s.is_dirty()) {
            let bytes = segment.header_bytes();
            let base = self.layout.segment_offset(segment.segment_number());
            file.write_at(base + self.layout.free_map_primary_offset(), &bytes)?;
            file.write_at(base + self.layout.free_map_secondary_offset(), &bytes)?;
            segment.mark_clean();
            written += 1;
        }

        let header = self.header.to_bytes()?;
        file.write_at(self.layout.header_primary_offset(), &header)?;
        file.write_at(self.layout.header_secondary_offset(), &header)?;
        file.sync()?;

        debug!(
            "Flushed {} ({} segment headers written)",
            self.path.display(),
            written
        );
        Ok(())
    }

    /// Flush and close
    ///
    /// Closing an already closed file is a no-op. If the final flush fails
    /// the file ends up [`FileState::Failed`] and rejects further use.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            FileState::Closed => return Ok(()),
            FileState::Open => {}
            FileState::Closing | FileState::Failed => return Err(BlockFileError::NotOpen),
        }

        self.state = FileState::Closing;
        match self.write_metadata() {
            Ok(()) => {
                self.state = FileState::Closed;
                info!("Closed block file {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                self.state = FileState::Failed;
                Err(e)
            }
        }
    }

    pub fn app_data(&self) -> &[u8] {
        self.header.app_data()
    }

    /// Replace the application data blob kept in the file header
    pub fn set_app_data(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.ensure_open()?;
        self.header.set_app_data(data.into())
    }

    /// Largest app-data blob the header can hold
    pub fn max_app_data_len(&self) -> Result<usize> {
        self.header.max_app_data_len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn segment_count(&self) -> u64 {
        self.segments.len() as u64
    }

    pub fn segment(&self, segment_number: u64) -> Option<&Segment> {
        usize::try_from(segment_number)
            .ok()
            .and_then(|i| self.segments.get(i))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn free_blocks(&self) -> u64 {
        self.segments.iter().map(|s| s.free_blocks() as u64).sum()
    }

    pub fn stats(&self) -> BlockFileStats {
        let total_blocks = self.segment_count() * self.layout.blocks_per_segment() as u64;
        let free_blocks = self.free_blocks();
        BlockFileStats {
            segments: self.segment_count(),
            total_blocks,
            free_blocks,
            used_blocks: total_blocks - free_blocks,
        }
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        if self.state == FileState::Open {
            if let Err(e) = self.write_metadata() {
                warn!("Flush on drop failed for {}: {}", self.path.display(), e);
            }
        }
    }
}
