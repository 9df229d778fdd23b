//! File format constants and layout definitions.
//!
//! This module defines the binary format for the bulk storage container:
//! magic bytes, version, layout sizes and the key-derivation parameters
//! baked into the format.

/// Magic bytes at the start of every container file.
pub const FILE_MAGIC: &[u8; 5] = b"BULK#";

/// Current format version: three ASCII hex nibbles, major first.
///
/// The accept predicate on open is permissive: any version whose major
/// nibble is `'0'` is readable; minor and patch are ignored.
pub const FORMAT_VERSION: [u8; 3] = *b"010";

/// Major version nibble accepted by `open`.
pub const VERSION_MAJOR: u8 = b'0';

/// Size of the file header in bytes.
/// Layout: magic(5) + version(3) + toc_info_cipher(512) = 520
pub const HEADER_SIZE: usize = 520;

/// Size of the RSA-encrypted TOC-info block inside the header.
/// Fixed by the RSA-4096 modulus.
pub const TOC_INFO_CIPHER_SIZE: usize = 512;

/// Size of the TOC-info plaintext.
/// Layout: toc_key(32) + toc_iv(16) + toc_start(8) + random padding(200)
pub const TOC_INFO_PLAIN_SIZE: usize = 256;

/// Random padding appended to the TOC-info plaintext.
pub const TOC_INFO_PAD_SIZE: usize = 200;

/// Size of one serialized file record.
pub const RECORD_SIZE: usize = 256;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an AES-CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// AES block size in bytes; ciphertext regions are always a multiple of
/// this and PKCS#7 padding adds between 1 and 16 bytes.
pub const BLOCK_SIZE: usize = 16;

/// PBKDF2-SHA256 iteration count for TOC key derivation.
pub const TOC_KDF_ITERATIONS: u32 = 16_384;

/// Salt length for TOC key derivation.
pub const TOC_KDF_SALT_SIZE: usize = 16;

/// Length of the random passphrase fed to the TOC key derivation.
pub const TOC_PASSPHRASE_SIZE: usize = 64;

/// Modulus size of the key pair protecting the TOC-info block.
pub const RSA_KEY_BITS: usize = 4096;
