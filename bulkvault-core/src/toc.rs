//! Table of Contents codec.
//!
//! On disk the TOC is the AES-256-CBC encryption of every record image
//! concatenated in declaration order. It occupies the file tail between
//! sessions and is discarded (truncated away) while a storage is open.

use zeroize::Zeroizing;

use crate::crypto::{cbc_decrypt, cbc_encrypt, TocKey};
use crate::error::StorageResult;
use crate::format::{BLOCK_SIZE, IV_SIZE, RECORD_SIZE};
use crate::record::FileRecord;

/// Encrypts the record table into its on-disk TOC image.
///
/// The result is always `256·n + 16` bytes: PKCS#7 adds one whole padding
/// block because record images are block-aligned.
#[must_use]
pub fn encode_toc(records: &[FileRecord], key: &TocKey, iv: &[u8; IV_SIZE]) -> Vec<u8> {
    let mut plain = Zeroizing::new(Vec::with_capacity(records.len() * RECORD_SIZE));
    for record in records {
        plain.extend_from_slice(&record.encode());
    }
    cbc_encrypt(key.as_bytes(), iv, &plain)
}

/// Decrypts a TOC image back into its record table.
///
/// # Errors
///
/// Returns an error if decryption or unpadding fails, or if any whole
/// record image is invalid.
pub fn decode_toc(
    bytes: &[u8],
    key: &TocKey,
    iv: &[u8; IV_SIZE],
) -> StorageResult<Vec<FileRecord>> {
    let plain = Zeroizing::new(cbc_decrypt(key.as_bytes(), iv, bytes)?);
    FileRecord::decode_many(&plain)
}

/// Size of the encoded TOC for `record_count` records.
#[must_use]
pub const fn encoded_toc_len(record_count: usize) -> usize {
    record_count * RECORD_SIZE + BLOCK_SIZE
}

// =============================================================================
// Tests
// =============================================================================
