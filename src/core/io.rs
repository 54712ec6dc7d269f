//! Disk I/O for block files

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Positional access to the backing file
pub struct StorageFile {
    file: File,
    path: PathBuf,
}

impl StorageFile {
    /// Create a new file, failing if one already exists
    pub fn create_new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(StorageFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(StorageFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Current file length in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read `len` bytes at `offset`
    ///
    /// Bytes past the end of the file read as zeros, the same as a hole in a
    /// sparse file.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(buffer)
    }

    /// Write all of `data` at `offset`, extending the file if needed
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockFileError;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_write_and_read_back() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = StorageFile::open(temp.path()).unwrap();

        file.write_at(100, b"Hello").unwrap();
        assert_eq!(file.len().unwrap(), 105);
        assert_eq!(file.read_at(100, 5).unwrap(), b"Hello");
    }

    #[test]
    fn test_read_past_end_is_zero_filled() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = StorageFile::open(temp.path()).unwrap();
        file.write_at(0, b"abc").unwrap();

        let data = file.read_at(1, 8).unwrap();
        assert_eq!(data, b"bc\0\0\0\0\0\0");

        let beyond = file.read_at(4096, 4).unwrap();
        assert_eq!(beyond, vec![0u8; 4]);
    }

    #[test]
    fn test_create_new_is_exclusive() {
        let temp = NamedTempFile::new().unwrap();

        let result = StorageFile::create_new(temp.path());
        match result {
            Err(BlockFileError::Io(e)) => assert_eq!(e.kind(), ErrorKind::AlreadyExists),
            _ => panic!("expected AlreadyExists"),
        }
    }

    #[test]
    fn test_create_new_then_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.blk");

        {
            let mut file = StorageFile::create_new(&path).unwrap();
            assert!(file.is_empty().unwrap());
            file.write_at(0, &[7u8; 16]).unwrap();
            file.sync().unwrap();
        }

        let mut file = StorageFile::open(&path).unwrap();
        assert_eq!(file.path(), path.as_path());
        assert_eq!(file.read_at(0, 16).unwrap(), vec![7u8; 16]);
    }
}
