//! Error types for the keystore.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the keystore.
///
/// Key material and plaintext never appear in any variant; only key names,
/// paths and operation descriptions do.
#[derive(Debug, Error)]
pub enum Error {
    /// The manager has not been initialized, or has been closed.
    #[error("secret manager not initialized")]
    NotInitialized,

    /// `initialize` was called on a manager that is already initialized.
    #[error("secret manager already initialized")]
    AlreadyInitialized,

    /// The storage directory is missing, not a directory, or accessible by
    /// group/other.
    #[error("storage directory is insecure: {path}: {reason}")]
    InsecureDirectory {
        /// The offending directory.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A secret or metadata file is not a regular file or is accessible by
    /// group/other.
    #[error("secret file is insecure: {path}: {reason}")]
    InsecureFile {
        /// The offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A file the guard was asked to vet does not exist.
    #[error("file not found: {path}")]
    FileNotFound {
        /// The missing file.
        path: PathBuf,
    },

    /// No record exists for the key.
    #[error("secret not found: {key}")]
    SecretNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The secret key cannot be used as a record name.
    #[error("invalid secret key: {reason}")]
    InvalidSecretKey {
        /// The reason the key is invalid.
        reason: String,
    },

    /// Ciphertext did not authenticate under the key (wrong key or tampering).
    #[error("decryption failed: {reason}")]
    DecryptionError {
        /// The reason decryption failed.
        reason: String,
    },

    /// The AEAD primitive refused to encrypt.
    #[error("encryption failed: {reason}")]
    EncryptionError {
        /// The reason encryption failed.
        reason: String,
    },

    /// Deriving the key-encryption key from the master password failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivation {
        /// The reason derivation failed.
        reason: String,
    },

    /// The re-encryption sweep aborted; the active key is unchanged.
    #[error("key rotation failed at '{key}': {reason}")]
    RotationFailed {
        /// The record (or stage) at which the sweep stopped.
        key: String,
        /// The underlying failure.
        reason: String,
    },

    /// Generic filesystem failure.
    #[error("storage I/O error at {path}: {source}")]
    StorageIo {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record, metadata or keyset file could not be (de)serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// The reason serialization failed.
        reason: String,
    },

    /// The persisted key and the rotation metadata disagree on the version.
    #[error("keyset version {keyset_version} does not match metadata version {metadata_version}")]
    KeysetMismatch {
        /// Version recorded in the keyset file.
        keyset_version: u32,
        /// Version recorded in the metadata file.
        metadata_version: u32,
    },

    /// The configuration is unusable.
    #[error("configuration error: {reason}")]
    Config {
        /// The reason the configuration was rejected.
        reason: String,
    },
}

impl Error {
    /// Wraps an I/O error with the path it occurred at.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true for the "no record" condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::SecretNotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for keystore operations.
pub type Result<T> = std::result::Result<T, Error>;
