//! Encrypted single-file bulk blob storage.
//!
//! A container file stores an append-only sequence of variably-sized
//! opaque blobs, each encrypted under its own AES-256-CBC key, together
//! with an encrypted Table of Contents and a header whose secrets are
//! sealed under an RSA-4096 public key. Blobs stream in through
//! [`BulkStorage::add`] and stream back out through [`BulkStorage::get`];
//! deletion is logical with a tail fast path, and [`BulkStorage::purge`]
//! compacts the holes away.
//!
//! # File Structure
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Header (520 bytes)            │  offset 0
//! │  magic + version + RSA-sealed TOC info   │
//! ├──────────────────────────────────────────┤
//! │                                          │
//! │        Blob Region (append-only)         │  offset 520+
//! │   one contiguous ciphertext per blob     │
//! │                                          │
//! ├──────────────────────────────────────────┤
//! │     Encrypted Table of Contents          │  offset toc_start
//! │     (present between sessions only)      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Session Protocol
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulkvault_core::{crypto, BulkStorage, MemoryStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = crypto::gen_key("container passphrase")?;
//! let public = crypto::load_public_key(&keys.public_key_pem)?;
//!
//! let mut storage = BulkStorage::create(Arc::new(MemoryStore::new()), &public)?;
//! let record = storage.add(&b"blob body"[..])?;
//!
//! if let Some(mut reader) = storage.get(record.uuid)? {
//!     let mut body = Vec::new();
//!     std::io::Read::read_to_end(&mut reader, &mut body)?;
//! }
//!
//! storage.sync(&public)?;
//! storage.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! The engine is confidentiality-only: CBC without integrity. Per-record
//! plaintext digests (CRC-32, MD5, SHA-256) are stored for collaborators
//! that want a verification hook.

#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod crypto;
pub mod error;
pub mod format;
pub mod header;
pub mod observer;
pub mod pool;
pub mod record;
pub mod storage;
pub mod store;
pub mod toc;

pub use crypto::{gen_key, load_private_key, load_public_key, BlobKey, StorageKeyPair, TocKey};
pub use error::{StorageError, StorageResult};
pub use header::{Header, TocInfo};
pub use observer::StorageObserver;
pub use pool::{select_target, StoragePolicy, StorageUsage};
pub use record::{Checksums, FileRecord, RecordFlags};
pub use storage::{BlobReader, BulkStorage};
pub use store::{BulkFileStore, DiskStore, MemoryStore};
