//! Container header and the TOC-info envelope.
//!
//! The header is the only part of the file readable without the symmetric
//! TOC key: its magic and version are plaintext, and everything the engine
//! needs to find and decrypt the Table of Contents travels inside a single
//! RSA-protected block.

use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::crypto::{rsa_open, rsa_seal, TocKey};
use crate::error::{StorageError, StorageResult};
use crate::format::{
    FILE_MAGIC, FORMAT_VERSION, HEADER_SIZE, IV_SIZE, KEY_SIZE, TOC_INFO_PAD_SIZE,
    TOC_INFO_PLAIN_SIZE, VERSION_MAJOR,
};

// =============================================================================
// TocInfo
// =============================================================================

/// The secrets needed to locate and decrypt the Table of Contents.
///
/// # Plaintext Layout (256 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       32    toc_key
/// 32      16    toc_iv
/// 48      8     toc_start (i64 LE)
/// 56      200   random padding
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocInfo {
    /// Symmetric key encrypting the TOC.
    pub toc_key: TocKey,
    /// IV for the TOC cipher.
    pub toc_iv: [u8; IV_SIZE],
    /// Byte offset where the TOC begins; equivalently, the tail after all
    /// blob regions.
    pub toc_start: i64,
}

impl TocInfo {
    /// Encodes the plaintext image, filling the tail with random padding.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[must_use]
    pub fn encode_plain(&self) -> Zeroizing<[u8; TOC_INFO_PLAIN_SIZE]> {
        let mut buf = Zeroizing::new([0u8; TOC_INFO_PLAIN_SIZE]);

        buf[0..KEY_SIZE].copy_from_slice(self.toc_key.as_bytes());
        buf[KEY_SIZE..KEY_SIZE + IV_SIZE].copy_from_slice(&self.toc_iv);
        buf[48..56].copy_from_slice(&self.toc_start.to_le_bytes());

        let mut padding = [0u8; TOC_INFO_PAD_SIZE];
        getrandom::getrandom(&mut padding).expect("getrandom failed");
        buf[56..].copy_from_slice(&padding);

        buf
    }

    /// Decodes the plaintext image; the random padding is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedEof`] if the buffer is shorter
    /// than the fixed fields.
    pub fn decode_plain(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < 56 {
            return Err(StorageError::eof("TOC-info plaintext too short"));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes[0..KEY_SIZE]);

        let mut toc_iv = [0u8; IV_SIZE];
        toc_iv.copy_from_slice(&bytes[KEY_SIZE..KEY_SIZE + IV_SIZE]);

        let mut start = [0u8; 8];
        start.copy_from_slice(&bytes[48..56]);

        Ok(Self {
            toc_key: TocKey::from_bytes(key),
            toc_iv,
            toc_start: i64::from_le_bytes(start),
        })
    }
}

// =============================================================================
// Header
// =============================================================================

/// Container file header.
///
/// # Binary Layout (520 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       5     magic ("BULK#")
/// 5       3     version (ASCII hex nibbles, major first)
/// 8       512   toc_info_cipher (RSA-OAEP over the TocInfo plaintext)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// The protected TOC location and key material.
    pub toc_info: TocInfo,
}

impl Header {
    /// Creates a header around the given TOC info.
    #[must_use]
    pub const fn new(toc_info: TocInfo) -> Self {
        Self { toc_info }
    }

    /// Encodes the header, sealing the TOC info under `public_key`.
    ///
    /// The result is deterministic only up to the random padding and the
    /// randomized OAEP encryption.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] if the RSA envelope fails or the
    /// key is not RSA-4096.
    pub fn encode(&self, public_key: &RsaPublicKey) -> StorageResult<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..5].copy_from_slice(FILE_MAGIC);
        buf[5..8].copy_from_slice(&FORMAT_VERSION);

        let plain = self.toc_info.encode_plain();
        let cipher = rsa_seal(public_key, &plain[..])?;
        buf[8..].copy_from_slice(&cipher);

        Ok(buf)
    }

    /// Decodes a header, opening the TOC info with `private_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The buffer is shorter than a header
    /// - The magic does not match or the major version is unsupported
    /// - The RSA envelope fails to open
    pub fn decode(bytes: &[u8], private_key: &RsaPrivateKey) -> StorageResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::eof("file header too short"));
        }

        if &bytes[0..5] != FILE_MAGIC {
            return Err(StorageError::incompatible(format!(
                "bad magic {:?}, expected {FILE_MAGIC:?}",
                &bytes[0..5]
            )));
        }

        if bytes[5] != VERSION_MAJOR {
            return Err(StorageError::incompatible(format!(
                "unsupported major version {:?}, expected {:?}",
                bytes[5] as char, VERSION_MAJOR as char
            )));
        }

        let plain = rsa_open(private_key, &bytes[8..HEADER_SIZE])?;
        let toc_info = TocInfo::decode_plain(&plain)?;

        Ok(Self { toc_info })
    }
}

// =============================================================================
// Tests
// =============================================================================
