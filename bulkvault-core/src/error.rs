//! Error types for the bulk storage engine.
//!
//! Every failure surfaces to the caller as a [`StorageError`]; the engine
//! performs no retries. The only local recovery is the rollback truncation
//! a failed `add` performs before returning.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the bulk storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An operation was attempted after `close()`.
    #[error("storage is closed")]
    StorageClosed,

    /// An underlying file operation failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Context describing the operation.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An RSA or AES operation failed (wrong key, corrupt ciphertext,
    /// unpad error).
    #[error("crypto failure: {context}")]
    Crypto {
        /// Context describing what was being encrypted or decrypted.
        context: String,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {context}")]
    KeyDerivation {
        /// Context describing what was being derived.
        context: String,
    },

    /// Magic mismatch or unsupported major version at open.
    #[error("incompatible file: {reason}")]
    IncompatibleFile {
        /// Description of the incompatibility.
        reason: String,
    },

    /// An `add` terminated before the encryptor finished; file state was
    /// rolled back to the reserved offset.
    #[error("write aborted: {context}")]
    WriteAborted {
        /// Description of why the write stopped.
        context: String,
    },

    /// A record failed validation during construction or parse.
    #[error("invalid record: {reason}")]
    InvalidRecord {
        /// Description of the violated constraint.
        reason: String,
    },

    /// Unexpected end of data while parsing a binary image.
    #[error("unexpected end of data: {context}")]
    UnexpectedEof {
        /// Context describing what was being parsed.
        context: String,
    },
}

impl StorageError {
    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a crypto failure.
    pub fn crypto<S: Into<String>>(context: S) -> Self {
        Self::Crypto {
            context: context.into(),
        }
    }

    /// Creates a key derivation failure.
    pub fn key_derivation<S: Into<String>>(context: S) -> Self {
        Self::KeyDerivation {
            context: context.into(),
        }
    }

    /// Creates an incompatible file error.
    pub fn incompatible<S: Into<String>>(reason: S) -> Self {
        Self::IncompatibleFile {
            reason: reason.into(),
        }
    }

    /// Creates a write aborted error.
    pub fn write_aborted<S: Into<String>>(context: S) -> Self {
        Self::WriteAborted {
            context: context.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record<S: Into<String>>(reason: S) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Creates an unexpected EOF error.
    pub fn eof<S: Into<String>>(context: S) -> Self {
        Self::UnexpectedEof {
            context: context.into(),
        }
    }
}
