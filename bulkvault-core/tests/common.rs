//! Common test utilities shared across integration tests.
//!
//! RSA-4096 generation is expensive, so one pair is generated per test
//! binary and shared through a `OnceLock`.

use std::io::Read;
use std::sync::OnceLock;

use bulkvault_core::crypto::{gen_key, load_private_key, load_public_key, StorageKeyPair};
use bulkvault_core::store::BulkFileStore;
use bulkvault_core::BlobReader;
use rsa::{RsaPrivateKey, RsaPublicKey};

pub const PASSPHRASE: &str = "integration-test-passphrase";

pub struct TestKeys {
    pub pair: StorageKeyPair,
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

pub fn keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let pair = gen_key(PASSPHRASE).expect("key generation");
        let private = load_private_key(&pair.private_key_pem, PASSPHRASE).expect("private key");
        let public = load_public_key(&pair.public_key_pem).expect("public key");
        TestKeys {
            pair,
            private,
            public,
        }
    })
}

/// Drains a blob reader to a byte vector.
pub fn read_blob<S: BulkFileStore>(mut reader: BlobReader<S>) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).expect("blob read");
    out
}

/// Deterministic pseudo-random payload of the given length.
#[must_use]
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
