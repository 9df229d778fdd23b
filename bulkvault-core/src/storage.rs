//! `BulkStorage` controller and the blob read stream.
//!
//! The controller owns the record table and the file handle, and is the
//! only writer. The session protocol:
//!
//! 1. `create` or `open` yields an open controller. `open` truncates the
//!    persisted TOC away so new blobs overwrite it.
//! 2. `add`/`delete` mutate the in-memory table; blob ciphertext goes to
//!    the file immediately, records do not.
//! 3. `sync` persists the table: truncate to the tail, write the encrypted
//!    TOC, rewrite the header.
//! 4. `close` releases the file handle; later calls fail with
//!    [`StorageError::StorageClosed`].
//!
//! # Concurrency
//!
//! Single-writer, multi-reader: every mutation takes `&mut self`, which is
//! the one-slot writer gate. [`BlobReader`]s hold their own reference to
//! the store and read only completed `[start, end)` regions, which never
//! overlap the write region at `[tail, ∞)`.
//!
//! # Durability
//!
//! If `sync` fails partway the on-disk state is undefined; reopen the
//! container from its last good sync. Journaling is future work.

// Offsets are i64 in the on-disk format; casts are guarded by validation.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use md5::Md5;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::{
    derive_fresh_toc_key, generate_iv, load_private_key, BlobKey, CbcStreamDecryptor,
    CbcStreamEncryptor, TocKey,
};
use crate::error::{StorageError, StorageResult};
use crate::format::{BLOCK_SIZE, HEADER_SIZE, IV_SIZE};
use crate::header::{Header, TocInfo};
use crate::observer::StorageObserver;
use crate::record::{Checksums, FileRecord};
use crate::store::{BulkFileStore, DiskStore};
use crate::toc::{decode_toc, encode_toc};

/// Plaintext chunk size for the add pump loop.
const PUMP_CHUNK: usize = 64 * 1024;

/// Ciphertext chunk size for blob reads; must be block-aligned.
const READ_CHUNK: usize = 64 * 1024;

/// Chunk size for purge compaction copies.
const COPY_CHUNK: usize = 128 * 1024;

// =============================================================================
// BulkStorage
// =============================================================================

/// Handle to an open bulk storage container.
///
/// Generic over the file backend so tests can run against
/// [`MemoryStore`](crate::store::MemoryStore); production code uses
/// [`DiskStore`] via [`create_at`](Self::create_at) /
/// [`open_at`](Self::open_at).
pub struct BulkStorage<S: BulkFileStore> {
    /// The underlying store; `None` once closed.
    store: Option<Arc<S>>,
    /// Record table in insertion order. Deleted records stay here (with
    /// the DELETED flag) until purge; tail deletes remove outright.
    records: Vec<FileRecord>,
    /// Secondary lookup from UUID to table position.
    index: HashMap<Uuid, usize>,
    /// Symmetric key for the TOC.
    toc_key: TocKey,
    /// IV for the TOC cipher.
    toc_iv: [u8; IV_SIZE],
    /// Tail of the blob region: the offset where the next blob (or the
    /// persisted TOC) starts.
    toc_start: i64,
    /// Lifecycle observer, registered at construction.
    observer: Option<Arc<dyn StorageObserver>>,
}

impl<S: BulkFileStore> BulkStorage<S> {
    /// Creates a fresh container in `store`, truncating whatever was
    /// there.
    ///
    /// A new TOC key is derived from a random passphrase, the header and
    /// an empty TOC are written, and an open controller is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation, the RSA envelope, or any file
    /// operation fails.
    pub fn create(store: Arc<S>, public_key: &RsaPublicKey) -> StorageResult<Self> {
        let toc_key = derive_fresh_toc_key()?;
        let toc_iv = generate_iv();
        let toc_start = HEADER_SIZE as i64;

        store.set_len(0)?;

        let header = Header::new(TocInfo {
            toc_key: toc_key.clone(),
            toc_iv,
            toc_start,
        });
        store.write_at(0, &header.encode(public_key)?)?;
        store.write_at(toc_start as u64, &encode_toc(&[], &toc_key, &toc_iv))?;
        store.sync()?;

        Ok(Self {
            store: Some(store),
            records: Vec::new(),
            index: HashMap::new(),
            toc_key,
            toc_iv,
            toc_start,
            observer: None,
        })
    }

    /// Opens an existing container, unlocking the private key PEM with
    /// `passphrase`.
    ///
    /// The persisted TOC is read, decrypted into the record table, and
    /// then truncated away so future appends overwrite it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IncompatibleFile`] on magic/version
    /// mismatch, [`StorageError::Crypto`] on key or TOC decryption
    /// failure, and [`StorageError::Io`] on file failures.
    pub fn open(store: Arc<S>, private_key_pem: &str, passphrase: &str) -> StorageResult<Self> {
        let private_key = load_private_key(private_key_pem, passphrase)?;
        Self::open_with_key(store, &private_key)
    }

    /// Opens an existing container with an already-loaded private key.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`open`](Self::open).
    pub fn open_with_key(store: Arc<S>, private_key: &RsaPrivateKey) -> StorageResult<Self> {
        let file_len = store.len()?;
        if file_len < HEADER_SIZE as u64 {
            return Err(StorageError::incompatible(format!(
                "file is {file_len} bytes, shorter than the {HEADER_SIZE}-byte header"
            )));
        }

        let header_bytes = store.read_at(0, HEADER_SIZE)?;
        let header = Header::decode(&header_bytes, private_key)?;
        let TocInfo {
            toc_key,
            toc_iv,
            toc_start,
        } = header.toc_info;

        if toc_start < HEADER_SIZE as i64 || toc_start as u64 > file_len {
            return Err(StorageError::incompatible(format!(
                "TOC start {toc_start} is outside the file (length {file_len})"
            )));
        }

        let toc_len = (file_len - toc_start as u64) as usize;
        let toc_bytes = store.read_at(toc_start as u64, toc_len)?;
        let records = decode_toc(&toc_bytes, &toc_key, &toc_iv)?;

        let mut index = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.uuid, i).is_some() {
                log::warn!("duplicate record uuid {} in TOC; later entry wins", record.uuid);
            }
        }

        // Release the TOC bytes so new blobs overwrite them.
        store.set_len(toc_start as u64)?;

        Ok(Self {
            store: Some(store),
            records,
            index,
            toc_key,
            toc_iv,
            toc_start,
            observer: None,
        })
    }

    /// Registers a lifecycle observer. Call once, at construction time.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StorageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns a read-only view of the record table, deleted records
    /// included.
    #[must_use]
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Returns `true` once [`close`](Self::close) has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.store.is_none()
    }

    /// Current tail: the offset where the next blob would be written.
    #[must_use]
    pub const fn tail(&self) -> i64 {
        self.toc_start
    }

    /// Stores a blob supplied as a byte stream.
    ///
    /// The stream is encrypted on the fly under a fresh key and IV while
    /// CRC-32, MD5 and SHA-256 of the plaintext are captured. On success
    /// the new record is appended to the table and returned.
    ///
    /// Not re-entrant: `&mut self` serializes all mutations.
    ///
    /// # Errors
    ///
    /// - [`StorageError::StorageClosed`] after close
    /// - [`StorageError::WriteAborted`] if the source stream fails; the
    ///   file is rolled back to its pre-add state
    /// - [`StorageError::Io`] if the store fails; also rolled back
    pub fn add<R: Read>(&mut self, mut source: R) -> StorageResult<FileRecord> {
        let store = Arc::clone(self.store()?);
        let start = self.toc_start;
        let key = BlobKey::generate();
        let iv = generate_iv();

        let mut encryptor = CbcStreamEncryptor::new(key.as_bytes(), &iv);
        let mut crc = crc32fast::Hasher::new();
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();

        let mut cursor = start as u64;
        let mut buf = vec![0u8; PUMP_CHUNK];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.rollback_add(&store, start);
                    return Err(StorageError::write_aborted(format!(
                        "source stream failed: {e}"
                    )));
                }
            };

            crc.update(&buf[..n]);
            md5.update(&buf[..n]);
            sha256.update(&buf[..n]);

            let ciphertext = encryptor.update(&buf[..n]);
            if !ciphertext.is_empty() {
                if let Err(e) = store.write_at(cursor, &ciphertext) {
                    self.rollback_add(&store, start);
                    return Err(e);
                }
                cursor += ciphertext.len() as u64;
            }
        }

        let tail_block = match encryptor.finish() {
            Ok(block) => block,
            Err(e) => {
                self.rollback_add(&store, start);
                return Err(StorageError::write_aborted(format!(
                    "encryptor failed to finish: {e}"
                )));
            }
        };
        if let Err(e) = store.write_at(cursor, &tail_block) {
            self.rollback_add(&store, start);
            return Err(e);
        }
        cursor += tail_block.len() as u64;

        let record = FileRecord::new(
            Uuid::new_v4(),
            start,
            cursor as i64,
            key,
            iv,
            Checksums {
                crc32: crc.finalize(),
                md5: md5.finalize().into(),
                sha256: sha256.finalize().into(),
            },
            now_epoch_ms(),
        )?;

        self.index.insert(record.uuid, self.records.len());
        self.records.push(record.clone());
        self.toc_start = cursor as i64;

        if let Some(observer) = &self.observer {
            observer.on_added(&record);
        }
        Ok(record)
    }

    /// Opens a decrypting read stream over a stored blob.
    ///
    /// Returns `None` if no record matches or the record is deleted. The
    /// reader stays valid across later mutations of the storage because
    /// completed regions are never rewritten (except by purge).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StorageClosed`] after close, or
    /// [`StorageError::Crypto`] if the record's region is not
    /// block-aligned.
    pub fn get(&self, uuid: Uuid) -> StorageResult<Option<BlobReader<S>>> {
        let store = self.store()?;
        let Some(&i) = self.index.get(&uuid) else {
            return Ok(None);
        };
        let record = &self.records[i];
        if record.flags.is_deleted() {
            return Ok(None);
        }
        BlobReader::new(Arc::clone(store), record).map(Some)
    }

    /// Logically deletes a blob.
    ///
    /// Returns `false` if the UUID is absent or already deleted. If the
    /// record is the current tail its bytes are reclaimed immediately:
    /// the record is removed and the file truncated. Otherwise the record
    /// is flagged DELETED and its ciphertext stays until [`purge`](Self::purge).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StorageClosed`] after close, or
    /// [`StorageError::Io`] if the tail truncation fails.
    pub fn delete(&mut self, uuid: Uuid) -> StorageResult<bool> {
        let store = Arc::clone(self.store()?);
        let Some(&i) = self.index.get(&uuid) else {
            return Ok(false);
        };
        if self.records[i].flags.is_deleted() {
            return Ok(false);
        }

        if self.records[i].end == self.toc_start {
            let start = self.records[i].start;
            store.set_len(start as u64)?;
            self.records.remove(i);
            self.index.remove(&uuid);
            for (j, record) in self.records.iter().enumerate().skip(i) {
                self.index.insert(record.uuid, j);
            }
            self.toc_start = start;
        } else {
            self.records[i].flags.toggle_deleted();
        }
        Ok(true)
    }

    /// Persists the record table.
    ///
    /// Truncates to the tail, writes the encrypted TOC, rewrites the
    /// header (the public key is supplied per call because the private
    /// key is not retained between open and sync), then fsyncs.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StorageClosed`] after close. If an I/O or
    /// crypto failure interrupts the sequence the on-disk state is
    /// undefined; the container should be reopened from its last good
    /// sync.
    pub fn sync(&mut self, public_key: &RsaPublicKey) -> StorageResult<()> {
        let store = Arc::clone(self.store()?);

        store.set_len(self.toc_start as u64)?;
        let toc = encode_toc(&self.records, &self.toc_key, &self.toc_iv);
        store.write_at(self.toc_start as u64, &toc)?;

        let header = Header::new(TocInfo {
            toc_key: self.toc_key.clone(),
            toc_iv: self.toc_iv,
            toc_start: self.toc_start,
        });
        store.write_at(0, &header.encode(public_key)?)?;
        store.sync()
    }

    /// Closes the storage and releases the file handle.
    ///
    /// Outstanding [`BlobReader`]s keep their own handle and stay
    /// readable. Any later call on this storage, including a second
    /// `close`, fails with [`StorageError::StorageClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StorageClosed`] if already closed.
    pub fn close(&mut self) -> StorageResult<()> {
        let store = self.store.take().ok_or(StorageError::StorageClosed)?;
        drop(store);
        if let Some(observer) = &self.observer {
            observer.on_finish(0);
        }
        Ok(())
    }

    /// Compacts the container: removes DELETED records and reclaims their
    /// space by sliding every later live region down.
    ///
    /// Ciphertext is copied verbatim (key and IV are preserved), record
    /// offsets are rewritten, and the file is truncated to the new tail.
    /// Returns the number of records removed.
    ///
    /// Not crash-safe: a failure mid-copy can leave a moved region
    /// half-written. Callers should sync and back up before compacting.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StorageClosed`] after close, or
    /// [`StorageError::Io`] if a copy or the final truncation fails.
    pub fn purge(&mut self) -> StorageResult<usize> {
        let store = Arc::clone(self.store()?);

        let mut write = HEADER_SIZE as i64;
        for i in 0..self.records.len() {
            if self.records[i].flags.is_deleted() {
                continue;
            }
            let start = self.records[i].start;
            let len = self.records[i].region_len();
            if start != write {
                copy_range(&*store, start as u64, write as u64, len as u64)?;
                self.records[i].start = write;
                self.records[i].end = write + len;
            }
            write += len;
        }

        let before = self.records.len();
        self.records.retain(|record| !record.flags.is_deleted());
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.uuid, i))
            .collect();

        store.set_len(write as u64)?;
        self.toc_start = write;
        Ok(before - self.records.len())
    }

    /// Returns the live store or [`StorageError::StorageClosed`].
    fn store(&self) -> StorageResult<&Arc<S>> {
        self.store.as_ref().ok_or(StorageError::StorageClosed)
    }

    /// Best-effort rollback of a failed add: truncate back to the
    /// reserved offset and notify the observer.
    fn rollback_add(&self, store: &Arc<S>, start: i64) {
        if let Err(e) = store.set_len(start as u64) {
            log::warn!("rollback truncation to {start} failed: {e}");
        }
        if let Some(observer) = &self.observer {
            observer.on_aborted();
        }
    }
}

impl BulkStorage<DiskStore> {
    /// Creates a fresh container file at `path`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`create`](Self::create), plus file
    /// creation/locking errors.
    pub fn create_at<P: AsRef<std::path::Path>>(
        path: P,
        public_key: &RsaPublicKey,
    ) -> StorageResult<Self> {
        let store = DiskStore::create(path)?;
        Self::create(Arc::new(store), public_key)
    }

    /// Opens the container file at `path`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`open`](Self::open), plus file
    /// opening/locking errors.
    pub fn open_at<P: AsRef<std::path::Path>>(
        path: P,
        private_key_pem: &str,
        passphrase: &str,
    ) -> StorageResult<Self> {
        let store = DiskStore::open(path)?;
        Self::open(Arc::new(store), private_key_pem, passphrase)
    }
}

impl<S: BulkFileStore> std::fmt::Debug for BulkStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkStorage")
            .field("records", &self.records.len())
            .field("tail", &self.toc_start)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// BlobReader
// =============================================================================

/// Decrypting pull stream over one stored blob.
///
/// Implements [`std::io::Read`]; consumption is fully under the caller's
/// control. The reader holds its own store handle, so it outlives `close`
/// of the storage that produced it.
pub struct BlobReader<S: BulkFileStore> {
    store: Arc<S>,
    decryptor: CbcStreamDecryptor,
    /// Next ciphertext offset to read.
    pos: u64,
    /// Ciphertext bytes not yet fetched from the store.
    remaining: u64,
    /// Decrypted bytes awaiting the caller.
    out: Vec<u8>,
    out_pos: usize,
}

impl<S: BulkFileStore> BlobReader<S> {
    fn new(store: Arc<S>, record: &FileRecord) -> StorageResult<Self> {
        let len = record.region_len();
        if len <= 0 || len % BLOCK_SIZE as i64 != 0 {
            return Err(StorageError::crypto(format!(
                "blob region length {len} is not a positive multiple of {BLOCK_SIZE}"
            )));
        }
        Ok(Self {
            store,
            decryptor: CbcStreamDecryptor::new(record.key.as_bytes(), &record.iv),
            pos: record.start as u64,
            remaining: len as u64,
            out: Vec::new(),
            out_pos: 0,
        })
    }

    /// Fetches and decrypts the next ciphertext chunk into `out`.
    fn fill(&mut self) -> StorageResult<()> {
        let take = self.remaining.min(READ_CHUNK as u64) as usize;
        let mut chunk = self.store.read_at(self.pos, take)?;
        self.pos += take as u64;
        self.remaining -= take as u64;

        if self.remaining == 0 {
            // The last block of the stream carries the padding.
            let body = chunk.len() - BLOCK_SIZE;
            self.decryptor.update(&mut chunk[..body]);
            let mut last = [0u8; BLOCK_SIZE];
            last.copy_from_slice(&chunk[body..]);
            let kept = self.decryptor.finish(&mut last)?;
            chunk.truncate(body);
            chunk.extend_from_slice(&last[..kept]);
        } else {
            self.decryptor.update(&mut chunk);
        }

        self.out = chunk;
        self.out_pos = 0;
        Ok(())
    }
}

impl<S: BulkFileStore> Read for BlobReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.out_pos == self.out.len() {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.fill().map_err(|e| match e {
                StorageError::Io { ref source, .. } => {
                    std::io::Error::new(source.kind(), e.to_string())
                }
                other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
            })?;
        }
        let n = buf.len().min(self.out.len() - self.out_pos);
        buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Copies `len` bytes from `src` to `dst` in chunks. `dst` must be at or
/// below `src`; chunks are copied in ascending order so a downward move
/// over an overlapping range stays correct.
fn copy_range<S: BulkFileStore + ?Sized>(
    store: &S,
    mut src: u64,
    mut dst: u64,
    len: u64,
) -> StorageResult<()> {
    let mut remaining = len;
    while remaining > 0 {
        let take = remaining.min(COPY_CHUNK as u64) as usize;
        let chunk = store.read_at(src, take)?;
        store.write_at(dst, &chunk)?;
        src += take as u64;
        dst += take as u64;
        remaining -= take as u64;
    }
    Ok(())
}

/// Current time as epoch milliseconds.
fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as i64
}

// =============================================================================
// Tests
// =============================================================================
