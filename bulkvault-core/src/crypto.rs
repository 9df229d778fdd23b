//! Cryptographic operations for the bulk storage engine.
//!
//! Three concerns live here:
//! - symmetric AES-256-CBC with PKCS#7 padding, both one-shot (TOC) and
//!   streaming (blob bodies),
//! - the RSA-OAEP envelope protecting the TOC-info block in the header,
//! - key material: zeroized key types, random generation, and the
//!   PBKDF2-SHA256 derivation of the TOC key.
//!
//! # Security Properties
//!
//! - **Zeroize on drop**: [`TocKey`] and [`BlobKey`] clear themselves from
//!   memory when dropped and never appear in `Debug` output.
//! - **Confidentiality only**: CBC provides no integrity. A bit-flip in
//!   ciphertext decrypts without error or garbles a tail block. The
//!   per-record plaintext digests give collaborators a detection hook, but
//!   this is not authenticated encryption.

use aes::cipher::{
    block_padding::{Pkcs7, RawPadding},
    generic_array::GenericArray,
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use hmac::Hmac;
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{StorageError, StorageResult};
use crate::format::{
    BLOCK_SIZE, IV_SIZE, KEY_SIZE, RSA_KEY_BITS, TOC_INFO_CIPHER_SIZE, TOC_KDF_ITERATIONS,
    TOC_KDF_SALT_SIZE, TOC_PASSPHRASE_SIZE,
};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// =============================================================================
// Key types
// =============================================================================

/// Symmetric key protecting the Table of Contents (256-bit).
///
/// Derived once per container via PBKDF2-SHA256 over a random passphrase
/// and carried inside the RSA-protected TOC-info block between sessions.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TocKey([u8; KEY_SIZE]);

impl TocKey {
    /// Creates a TOC key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for TocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TocKey").field("key", &"[REDACTED]").finish()
    }
}

/// Per-blob symmetric key (256-bit).
///
/// Every blob body is encrypted under its own fresh key, stored in the
/// blob's record inside the encrypted TOC.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BlobKey([u8; KEY_SIZE]);

impl BlobKey {
    /// Creates a blob key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random blob key.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobKey").field("key", &"[REDACTED]").finish()
    }
}

/// Generates a fresh random initialization vector.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
#[must_use]
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv).expect("getrandom failed");
    iv
}

// =============================================================================
// Key derivation
// =============================================================================

/// Derives a TOC key from a passphrase and salt using PBKDF2-SHA256.
///
/// # Errors
///
/// Returns [`StorageError::KeyDerivation`] if the PRF rejects the
/// requested output length.
pub fn derive_toc_key(passphrase: &[u8], salt: &[u8]) -> StorageResult<TocKey> {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase, salt, TOC_KDF_ITERATIONS, &mut key)
        .map_err(|_| StorageError::key_derivation("PBKDF2 rejected output length"))?;
    Ok(TocKey::from_bytes(key))
}

/// Derives a fresh TOC key from a random 64-byte passphrase and a random
/// 16-byte salt. Neither input is retained; the derived key is the only
/// secret that survives.
///
/// # Errors
///
/// Returns [`StorageError::KeyDerivation`] if derivation fails.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
pub fn derive_fresh_toc_key() -> StorageResult<TocKey> {
    let mut passphrase = Zeroizing::new([0u8; TOC_PASSPHRASE_SIZE]);
    getrandom::getrandom(&mut passphrase[..]).expect("getrandom failed");
    let mut salt = [0u8; TOC_KDF_SALT_SIZE];
    getrandom::getrandom(&mut salt).expect("getrandom failed");
    derive_toc_key(&passphrase[..], &salt)
}

// =============================================================================
// One-shot AES-256-CBC
// =============================================================================

/// Encrypts a buffer with AES-256-CBC and PKCS#7 padding.
///
/// Output length is always `(plaintext.len() / 16 + 1) * 16`: padding adds
/// between 1 and 16 bytes.
#[must_use]
pub fn cbc_encrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts an AES-256-CBC buffer and strips PKCS#7 padding.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] if the buffer is not block-aligned or
/// the padding is invalid (wrong key or corrupt ciphertext).
pub fn cbc_decrypt(
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> StorageResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(StorageError::crypto(format!(
            "CBC ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }
    Aes256CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| StorageError::crypto("CBC unpad failed"))
}

// =============================================================================
// Streaming AES-256-CBC
// =============================================================================

/// Incremental CBC encryptor for blob bodies.
///
/// Feed arbitrary-sized plaintext chunks with [`update`](Self::update);
/// full cipher blocks are produced as soon as they are available. The
/// final partial block is padded and emitted by [`finish`](Self::finish).
pub struct CbcStreamEncryptor {
    enc: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl CbcStreamEncryptor {
    /// Creates an encryptor for the given key and IV.
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            enc: Aes256CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    /// Absorbs plaintext and returns the ciphertext of every block that
    /// became complete. Less than one block of input may be buffered.
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let full = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..full).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// Pads and encrypts the buffered tail, returning the final cipher
    /// block. Always produces exactly one block.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] if padding fails; this cannot
    /// happen for tails shorter than one block.
    pub fn finish(self) -> StorageResult<Vec<u8>> {
        let Self { enc, pending } = self;
        let rem = pending.len();
        let mut tail = Zeroizing::new([0u8; BLOCK_SIZE]);
        tail[..rem].copy_from_slice(&pending);
        let out = enc
            .encrypt_padded_mut::<Pkcs7>(&mut tail[..], rem)
            .map_err(|_| StorageError::crypto("CBC padding failed"))?;
        Ok(out.to_vec())
    }
}

/// Incremental CBC decryptor for blob bodies.
///
/// The caller decrypts whole blocks with [`update`](Self::update) and must
/// route the final block of the stream through [`finish`](Self::finish),
/// which strips the PKCS#7 padding.
pub struct CbcStreamDecryptor {
    dec: Aes256CbcDec,
}

impl CbcStreamDecryptor {
    /// Creates a decryptor for the given key and IV.
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            dec: Aes256CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// Decrypts whole cipher blocks in place.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not a multiple of the block size; callers feed
    /// block-aligned reads only.
    pub fn update(&mut self, buf: &mut [u8]) {
        assert_eq!(buf.len() % BLOCK_SIZE, 0, "CBC update requires whole blocks");
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypts the final block in place and validates its padding,
    /// returning the number of plaintext bytes it carries (0 to 15).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] on invalid padding (wrong key or
    /// corrupt ciphertext).
    pub fn finish(&mut self, block: &mut [u8; BLOCK_SIZE]) -> StorageResult<usize> {
        self.dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
        let plaintext = Pkcs7::raw_unpad(&block[..])
            .map_err(|_| StorageError::crypto("CBC unpad failed"))?;
        Ok(plaintext.len())
    }
}

// =============================================================================
// RSA-OAEP envelope
// =============================================================================

/// Encrypts the TOC-info plaintext under the container's public key.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] if encryption fails or the key is not
/// RSA-4096 (the header layout fixes the envelope at 512 bytes).
pub fn rsa_seal(public_key: &RsaPublicKey, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
    let mut rng = rand::rngs::OsRng;
    let ciphertext = public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| StorageError::crypto(format!("RSA-OAEP encryption failed: {e}")))?;
    if ciphertext.len() != TOC_INFO_CIPHER_SIZE {
        return Err(StorageError::crypto(format!(
            "TOC-info envelope is {} bytes, expected {TOC_INFO_CIPHER_SIZE} (RSA-{RSA_KEY_BITS} key required)",
            ciphertext.len()
        )));
    }
    Ok(ciphertext)
}

/// Decrypts the TOC-info envelope with the container's private key.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] on any RSA failure (wrong key,
/// corrupt envelope).
pub fn rsa_open(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> StorageResult<Zeroizing<Vec<u8>>> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| StorageError::crypto(format!("RSA-OAEP decryption failed: {e}")))
}

// =============================================================================
// Key pair generation and loading
// =============================================================================

/// A generated container key pair in PEM form.
///
/// The private key is a passphrase-encrypted PKCS#8 PEM; the public key is
/// an SPKI PEM.
pub struct StorageKeyPair {
    /// Encrypted PKCS#8 private key PEM.
    pub private_key_pem: Zeroizing<String>,
    /// SPKI public key PEM.
    pub public_key_pem: String,
}

impl std::fmt::Debug for StorageKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageKeyPair")
            .field("private_key_pem", &"[REDACTED]")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

/// Generates an RSA-4096 key pair compatible with the container format.
///
/// This is expensive (seconds, not milliseconds); callers generate once
/// per container and keep the PEMs.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] if key generation or PEM encoding
/// fails.
pub fn gen_key(passphrase: &str) -> StorageResult<StorageKeyPair> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| StorageError::crypto(format!("RSA key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_encrypted_pem(&mut rng, passphrase.as_bytes(), LineEnding::LF)
        .map_err(|e| StorageError::crypto(format!("private key encoding failed: {e}")))?;
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| StorageError::crypto(format!("public key encoding failed: {e}")))?;

    Ok(StorageKeyPair {
        private_key_pem,
        public_key_pem,
    })
}

/// Loads a passphrase-encrypted PKCS#8 private key PEM.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] if the PEM is malformed or the
/// passphrase is wrong.
pub fn load_private_key(pem: &str, passphrase: &str) -> StorageResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
        .map_err(|e| StorageError::crypto(format!("private key decode failed: {e}")))
}

/// Loads an SPKI public key PEM.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] if the PEM is malformed.
pub fn load_public_key(pem: &str) -> StorageResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| StorageError::crypto(format!("public key decode failed: {e}")))
}

// =============================================================================
// Tests
// =============================================================================
