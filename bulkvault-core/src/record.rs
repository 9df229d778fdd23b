//! File record definitions and their fixed binary layout.
//!
//! One record describes one stored blob: where its ciphertext lives, the
//! key material protecting it, and the plaintext digests captured while it
//! was written.

// Binary format code uses small constant casts that are safe
#![allow(clippy::cast_possible_truncation)]

use uuid::Uuid;

use crate::crypto::BlobKey;
use crate::error::{StorageError, StorageResult};
use crate::format::{IV_SIZE, KEY_SIZE, RECORD_SIZE};

// =============================================================================
// RecordFlags
// =============================================================================

/// Record state bit-field.
///
/// Bit 0 is BUSY, bit 1 is DELETED, bit 2 is NOT_READY; the remaining bits
/// are reserved. BUSY and NOT_READY are reserved for future concurrency
/// control and are never set by the current engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFlags(u16);

impl RecordFlags {
    const BUSY: u16 = 1 << 0;
    const DELETED: u16 = 1 << 1;
    const NOT_READY: u16 = 1 << 2;

    /// Creates an empty flag set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Reconstructs flags from their on-disk value. Reserved bits are
    /// preserved verbatim.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw bit value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the BUSY bit is set.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        self.0 & Self::BUSY != 0
    }

    /// Returns `true` if the DELETED bit is set.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        self.0 & Self::DELETED != 0
    }

    /// Returns `true` if the NOT_READY bit is set.
    #[must_use]
    pub const fn is_not_ready(self) -> bool {
        self.0 & Self::NOT_READY != 0
    }

    /// Flips the BUSY bit.
    pub fn toggle_busy(&mut self) {
        self.0 ^= Self::BUSY;
    }

    /// Flips the DELETED bit.
    pub fn toggle_deleted(&mut self) {
        self.0 ^= Self::DELETED;
    }

    /// Flips the NOT_READY bit.
    pub fn toggle_not_ready(&mut self) {
        self.0 ^= Self::NOT_READY;
    }
}

// =============================================================================
// Checksums
// =============================================================================

/// Plaintext digests captured while a blob is written.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Checksums {
    /// CRC-32 of the plaintext.
    pub crc32: u32,
    /// MD5 of the plaintext.
    pub md5: [u8; 16],
    /// SHA-256 of the plaintext.
    pub sha256: [u8; 32],
}

impl Checksums {
    /// MD5 digest as lowercase hex.
    #[must_use]
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    /// SHA-256 digest as lowercase hex.
    #[must_use]
    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

impl std::fmt::Debug for Checksums {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checksums")
            .field("crc32", &format_args!("{:08x}", self.crc32))
            .field("md5", &self.md5_hex())
            .field("sha256", &self.sha256_hex())
            .finish()
    }
}

// =============================================================================
// FileRecord
// =============================================================================

/// Metadata entry describing one stored blob.
///
/// # Binary Layout (256 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       16    uuid
/// 16      8     start (i64 LE), ciphertext start offset
/// 24      8     end (i64 LE), one past ciphertext end; start < end
/// 32      32    key (AES-256)
/// 64      16    iv
/// 80      4     crc32 of plaintext (u32 LE)
/// 84      16    md5 of plaintext
/// 100     32    sha256 of plaintext
/// 132     8     ctime (i64 LE, epoch milliseconds)
/// 140     2     flags (u16 LE)
/// 142     114   reserved, zero on encode, ignored on decode
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Stable blob identifier, unique within a storage.
    pub uuid: Uuid,
    /// Byte offset of the ciphertext start.
    pub start: i64,
    /// Byte offset one past the ciphertext end.
    pub end: i64,
    /// Symmetric key for this blob's body.
    pub key: BlobKey,
    /// Initialization vector for this blob's body.
    pub iv: [u8; IV_SIZE],
    /// Plaintext digests.
    pub checksums: Checksums,
    /// Creation time, epoch milliseconds.
    pub ctime_ms: i64,
    /// Record state flags.
    pub flags: RecordFlags,
}

impl FileRecord {
    /// Creates a record, validating the region bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRecord`] if `start >= end`.
    pub fn new(
        uuid: Uuid,
        start: i64,
        end: i64,
        key: BlobKey,
        iv: [u8; IV_SIZE],
        checksums: Checksums,
        ctime_ms: i64,
    ) -> StorageResult<Self> {
        if start >= end {
            return Err(StorageError::invalid_record(format!(
                "start {start} >= end {end}"
            )));
        }
        Ok(Self {
            uuid,
            start,
            end,
            key,
            iv,
            checksums,
            ctime_ms,
            flags: RecordFlags::new(),
        })
    }

    /// Length of the ciphertext region in bytes.
    #[must_use]
    pub const fn region_len(&self) -> i64 {
        self.end - self.start
    }

    /// Encodes the record to its 256-byte image. Reserved bytes are zero.
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];

        buf[0..16].copy_from_slice(self.uuid.as_bytes());
        buf[16..24].copy_from_slice(&self.start.to_le_bytes());
        buf[24..32].copy_from_slice(&self.end.to_le_bytes());
        buf[32..64].copy_from_slice(self.key.as_bytes());
        buf[64..80].copy_from_slice(&self.iv);
        buf[80..84].copy_from_slice(&self.checksums.crc32.to_le_bytes());
        buf[84..100].copy_from_slice(&self.checksums.md5);
        buf[100..132].copy_from_slice(&self.checksums.sha256);
        buf[132..140].copy_from_slice(&self.ctime_ms.to_le_bytes());
        buf[140..142].copy_from_slice(&self.flags.bits().to_le_bytes());

        buf
    }

    /// Decodes a record from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The buffer is shorter than one record
    /// - The region bounds are invalid (`start >= end`)
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < RECORD_SIZE {
            return Err(StorageError::eof("file record too short"));
        }

        let uuid = Uuid::from_bytes(read_array::<16>(bytes, 0));
        let start = i64::from_le_bytes(read_array::<8>(bytes, 16));
        let end = i64::from_le_bytes(read_array::<8>(bytes, 24));
        if start >= end {
            return Err(StorageError::invalid_record(format!(
                "start {start} >= end {end}"
            )));
        }

        let key = BlobKey::from_bytes(read_array::<KEY_SIZE>(bytes, 32));
        let iv = read_array::<IV_SIZE>(bytes, 64);
        let crc32 = u32::from_le_bytes(read_array::<4>(bytes, 80));
        let md5 = read_array::<16>(bytes, 84);
        let sha256 = read_array::<32>(bytes, 100);
        let ctime_ms = i64::from_le_bytes(read_array::<8>(bytes, 132));
        let flags = RecordFlags::from_bits(u16::from_le_bytes(read_array::<2>(bytes, 140)));

        Ok(Self {
            uuid,
            start,
            end,
            key,
            iv,
            checksums: Checksums { crc32, md5, sha256 },
            ctime_ms,
            flags,
        })
    }

    /// Decodes every whole record in a contiguous buffer.
    ///
    /// A trailing partial record is ignored with a warning; an empty
    /// buffer yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns an error if any whole record fails to decode.
    pub fn decode_many(bytes: &[u8]) -> StorageResult<Vec<Self>> {
        let trailing = bytes.len() % RECORD_SIZE;
        if trailing != 0 {
            log::warn!(
                "table of contents has {trailing} trailing bytes after {} records; ignoring",
                bytes.len() / RECORD_SIZE
            );
        }

        bytes
            .chunks_exact(RECORD_SIZE)
            .map(Self::decode)
            .collect()
    }
}

impl std::fmt::Debug for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRecord")
            .field("uuid", &self.uuid)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("key", &"[REDACTED]")
            .field("iv", &hex::encode(self.iv))
            .field("checksums", &self.checksums)
            .field("ctime_ms", &self.ctime_ms)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Copies a fixed-size array out of `bytes` at `offset`. Callers check
/// the buffer length first.
fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(start: i64, end: i64) -> FileRecord {
        FileRecord::new(
            Uuid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10),
            start,
            end,
            BlobKey::from_bytes([0x42u8; KEY_SIZE]),
            [0x17u8; IV_SIZE],
            Checksums {
                crc32: 0xDEAD_BEEF,
                md5: [0xAAu8; 16],
                sha256: [0xBBu8; 32],
            },
            1_700_000_000_123,
        )
        .unwrap()
    }

    #[test]
    fn test_flags_fresh_is_normal() {
        let flags = RecordFlags::new();
        assert!(flags.is_normal());
        assert!(!flags.is_busy());
        assert!(!flags.is_deleted());
        assert!(!flags.is_not_ready());
    }

    #[test]
    fn test_flags_toggle_is_own_inverse() {
        let mut flags = RecordFlags::new();

        flags.toggle_busy();
        assert!(flags.is_busy());
        flags.toggle_busy();
        assert!(flags.is_normal());

        flags.toggle_deleted();
        assert!(flags.is_deleted());
        assert!(!flags.is_normal());
        flags.toggle_deleted();
        assert!(flags.is_normal());

        flags.toggle_not_ready();
        assert!(flags.is_not_ready());
        flags.toggle_not_ready();
        assert!(flags.is_normal());
    }

    #[test]
    fn test_flags_bits_roundtrip() {
        let mut flags = RecordFlags::new();
        flags.toggle_deleted();
        flags.toggle_not_ready();
        let restored = RecordFlags::from_bits(flags.bits());
        assert_eq!(flags, restored);
        assert_eq!(restored.bits(), 0b110);
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample_record(520, 1056);
        let encoded = record.encode();
        assert_eq!(encoded.len(), RECORD_SIZE);

        let decoded = FileRecord::decode(&encoded).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_record_reserved_bytes_zero_and_ignored() {
        let record = sample_record(520, 536);
        let mut encoded = record.encode();
        assert!(encoded[142..].iter().all(|&b| b == 0));

        // Garbage in the reserved region must not affect decoding.
        for (i, b) in encoded[142..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let decoded = FileRecord::decode(&encoded).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_record_invalid_bounds() {
        let result = FileRecord::new(
            Uuid::new_v4(),
            10,
            5,
            BlobKey::from_bytes([0u8; KEY_SIZE]),
            [0u8; IV_SIZE],
            Checksums {
                crc32: 0,
                md5: [0u8; 16],
                sha256: [0u8; 32],
            },
            0,
        );
        assert!(matches!(result, Err(StorageError::InvalidRecord { .. })));

        // Equal bounds are also invalid.
        let mut encoded = sample_record(520, 536).encode();
        encoded[24..32].copy_from_slice(&520i64.to_le_bytes());
        assert!(matches!(
            FileRecord::decode(&encoded),
            Err(StorageError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_record_decode_short_buffer() {
        let result = FileRecord::decode(&[0u8; RECORD_SIZE - 1]);
        assert!(matches!(result, Err(StorageError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_decode_many_roundtrip() {
        let records = vec![
            sample_record(520, 1040),
            sample_record(1040, 2080),
            sample_record(2080, 2096),
        ];
        let mut buf = Vec::new();
        for r in &records {
            buf.extend_from_slice(&r.encode());
        }

        let decoded = FileRecord::decode_many(&buf).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_decode_many_empty() {
        assert!(FileRecord::decode_many(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_many_ignores_trailing_partial() {
        let record = sample_record(520, 1040);
        let mut buf = record.encode().to_vec();
        buf.extend_from_slice(&[0x99u8; 100]);

        let decoded = FileRecord::decode_many(&buf).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], record);
    }

    #[test]
    fn test_record_debug_redacts_key() {
        let record = sample_record(520, 536);
        let debug = format!("{record:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("424242"));
    }
}
