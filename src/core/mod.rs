//! Block file engine
//!
//! - [`error`] - Error types for block file operations
//! - [`layout`] - Layout configuration and derived geometry
//! - [`handle`] - Block handles and their binary/text forms
//! - [`checksum`] - CRC-16/CRC-32 helpers for metadata copies
//! - [`allocator`] - Free block bitmap and span-indexed allocator
//! - [`segment`] - Segment free space management
//! - [`header`] - File header encoding
//! - [`io`] - Positional file access
//! - [`block_file`] - The `BlockFile` orchestrator

pub mod allocator;
pub mod block_file;
pub mod checksum;
pub mod error;
pub mod handle;
pub mod header;
pub mod io;
pub mod layout;
pub mod segment;

pub use block_file::{BlockFile, BlockFileStats, FileState};
