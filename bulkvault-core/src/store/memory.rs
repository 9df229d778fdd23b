//! In-memory container store for testing.
//!
//! Simulates a random-access file with a byte vector. NOT intended for
//! production use; it exists so the engine can be exercised without
//! touching the filesystem.

use std::sync::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::store::BulkFileStore;

/// In-memory implementation of [`BulkFileStore`] backed by a `Vec<u8>`.
pub struct MemoryStore {
    /// The "file" contents.
    data: RwLock<Vec<u8>>,
    /// Tracks sync calls for testing.
    sync_count: Mutex<u64>,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            sync_count: Mutex::new(0),
        }
    }

    /// Creates a memory store with initial contents.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            sync_count: Mutex::new(0),
        }
    }

    /// Returns the number of times `sync()` has been called.
    ///
    /// # Panics
    ///
    /// Panics if the counter mutex is poisoned.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        *self.sync_count.lock().unwrap()
    }

    /// Returns a copy of the current contents.
    ///
    /// # Panics
    ///
    /// Panics if the data lock is poisoned.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().unwrap().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkFileStore for MemoryStore {
    fn len(&self) -> StorageResult<u64> {
        Ok(self.data.read().unwrap().len() as u64)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read().unwrap();
        let start = usize::try_from(offset).map_err(|_| {
            StorageError::io(
                "memory read",
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "offset overflows"),
            )
        })?;
        let end = start.saturating_add(len);

        if end > data.len() {
            return Err(StorageError::io(
                format!(
                    "read beyond EOF: offset={offset}, len={len}, file_len={}",
                    data.len()
                ),
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read beyond EOF"),
            ));
        }

        Ok(data[start..end].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write().unwrap();
        let start = offset as usize;
        let end = start + bytes.len();

        if end > data.len() {
            data.resize(end, 0);
        }

        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn append(&self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write().unwrap();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn set_len(&self, len: u64) -> StorageResult<()> {
        let mut data = self.data.write().unwrap();
        data.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        *self.sync_count.lock().unwrap() += 1;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
