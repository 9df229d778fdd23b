//! Disk-backed container store.
//!
//! Implements [`BulkFileStore`] over a standard file handle with seek-based
//! positioned I/O.
//!
//! # Concurrency
//!
//! The handle is protected by a mutex so the store can be shared between
//! the controller and outstanding blob readers. Cross-process exclusivity
//! comes from an advisory lock taken for the lifetime of the handle; a
//! second open of the same container fails instead of corrupting it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use crate::error::{StorageError, StorageResult};
use crate::store::BulkFileStore;

/// Helper to create an IO error from an `std::io::Error`.
fn io_error<S: Into<String>>(context: S, err: std::io::Error) -> StorageError {
    StorageError::Io {
        context: context.into(),
        source: err,
    }
}

/// Disk-backed implementation of [`BulkFileStore`].
#[derive(Debug)]
pub struct DiskStore {
    /// Path to the container file.
    path: PathBuf,
    /// File handle, protected by a mutex for shared access.
    file: Mutex<File>,
}

impl DiskStore {
    /// Creates (or truncates) the container file and takes the exclusive
    /// lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or another process
    /// holds the lock.
    pub fn create<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_error(format!("create container '{}'", path.display()), e))?;
        Self::with_locked_file(path, file)
    }

    /// Opens an existing container file and takes the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or another process
    /// holds the lock.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error(format!("open container '{}'", path.display()), e))?;
        Self::with_locked_file(path, file)
    }

    fn with_locked_file(path: PathBuf, file: File) -> StorageResult<Self> {
        file.try_lock_exclusive()
            .map_err(|e| io_error(format!("lock container '{}'", path.display()), e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the container file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, File>> {
        self.file.lock().map_err(|_| {
            io_error(
                "container store",
                std::io::Error::new(std::io::ErrorKind::Other, "file mutex poisoned"),
            )
        })
    }
}

impl BulkFileStore for DiskStore {
    fn len(&self) -> StorageResult<u64> {
        let file = self.lock()?;
        let meta = file
            .metadata()
            .map_err(|e| io_error("container metadata", e))?;
        Ok(meta.len())
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| io_error(format!("seek to {offset}"), e))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .map_err(|e| io_error(format!("read {len} bytes at {offset}"), e))?;
        Ok(buf)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| io_error(format!("seek to {offset}"), e))?;
        file.write_all(bytes)
            .map_err(|e| io_error(format!("write {} bytes at {offset}", bytes.len()), e))?;
        Ok(())
    }

    fn append(&self, bytes: &[u8]) -> StorageResult<u64> {
        let mut file = self.lock()?;
        let offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| io_error("seek to end", e))?;
        file.write_all(bytes)
            .map_err(|e| io_error(format!("append {} bytes", bytes.len()), e))?;
        Ok(offset)
    }

    fn set_len(&self, len: u64) -> StorageResult<()> {
        let file = self.lock()?;
        file.set_len(len)
            .map_err(|e| io_error(format!("truncate to {len}"), e))
    }

    fn sync(&self) -> StorageResult<()> {
        let file = self.lock()?;
        file.sync_all().map_err(|e| io_error("fsync container", e))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bulk");

        let store = DiskStore::create(&path).unwrap();
        assert!(store.is_empty().unwrap());

        store.write_at(0, b"header data").unwrap();
        assert_eq!(store.len().unwrap(), 11);
        assert_eq!(store.read_at(0, 11).unwrap(), b"header data");
        assert_eq!(store.read_at(7, 4).unwrap(), b"data");
    }

    #[test]
    fn test_append_returns_offset() {
        let dir = tempdir().unwrap();
        let store = DiskStore::create(dir.path().join("a.bulk")).unwrap();

        assert_eq!(store.append(b"hello").unwrap(), 0);
        assert_eq!(store.append(b" world").unwrap(), 5);
        assert_eq!(store.read_at(0, 11).unwrap(), b"hello world");
    }

    #[test]
    fn test_set_len_truncates_and_extends() {
        let dir = tempdir().unwrap();
        let store = DiskStore::create(dir.path().join("a.bulk")).unwrap();

        store.write_at(0, b"0123456789").unwrap();
        store.set_len(4).unwrap();
        assert_eq!(store.len().unwrap(), 4);
        assert_eq!(store.read_at(0, 4).unwrap(), b"0123");

        store.set_len(8).unwrap();
        assert_eq!(store.read_at(0, 8).unwrap(), b"0123\0\0\0\0");
    }

    #[test]
    fn test_read_beyond_eof_fails() {
        let dir = tempdir().unwrap();
        let store = DiskStore::create(dir.path().join("a.bulk")).unwrap();
        store.write_at(0, b"abc").unwrap();

        let result = store.read_at(0, 10);
        assert!(matches!(result, Err(StorageError::Io { .. })));
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.bulk");

        {
            let store = DiskStore::create(&path).unwrap();
            store.write_at(0, b"persisted").unwrap();
            store.sync().unwrap();
        }

        let store = DiskStore::open(&path).unwrap();
        assert_eq!(store.read_at(0, 9).unwrap(), b"persisted");
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.bulk");

        let _store = DiskStore::create(&path).unwrap();
        let second = DiskStore::open(&path);
        assert!(matches!(second, Err(StorageError::Io { .. })));
    }
}
