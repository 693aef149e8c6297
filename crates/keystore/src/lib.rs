//! # Keystore
//!
//! A local secret store that keeps every value encrypted at rest:
//!
//! - **Authenticated encryption**: ChaCha20-Poly1305 under a per-record key
//!   derived from the active data key
//! - **Versioned key rotation**: rotation re-encrypts every record into a
//!   staging area and commits atomically; interrupted rotations are finished
//!   or discarded on the next start
//! - **Fail-closed permissions**: the store directory must be `0700` and
//!   every file `0600`, checked before each read
//! - **Durable keys**: the data key is persisted, optionally sealed under an
//!   Argon2id-derived key from a master password
//!
//! ## Example
//!
//! ```rust
//! use keystore::{Config, FileSecretManager, KeyRotator, SecretManager};
//!
//! let dir = tempfile::tempdir().expect("tempdir");
//! let manager = FileSecretManager::open(Config::new(dir.path().join("secrets")))
//!     .expect("open store");
//!
//! manager.set_secret("database.password", b"hunter2").expect("set");
//! manager.rotate_keys().expect("rotate");
//!
//! let value = manager.get_secret("database.password").expect("get");
//! assert_eq!(value.as_bytes(), b"hunter2");
//! assert_eq!(manager.key_metadata().expect("metadata").current_version, 2);
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <root>/                    0700
//!   <key>.secret             0600  one encrypted record per secret
//!   keyset_metadata.json     0600  rotation metadata
//!   keyset.json              0600  the data key (sealed with a master password)
//!   .rotation/               0700  only present while a rotation is in flight
//! ```
//!
//! ## Security Considerations
//!
//! - Key material and plaintext values are zeroized on drop
//! - Secret values compare in constant time
//! - Debug output for keys, passwords and values is redacted
//! - The store assumes a single owning process

#![forbid(unsafe_code)]

pub mod atomic;
pub mod cipher;
pub mod config;
pub mod error;
pub mod guard;
pub mod keyset;
pub mod manager;
pub mod metadata;
pub mod records;
pub mod rotation;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{KeysetMetadata, RotationPolicy, SecretName, SecretRecord, SecretValue, Status};

pub use config::{Config, MasterPassword, StorageLocation, default_storage_path};

pub use cipher::{CipherEngine, DataKey};

pub use guard::PermissionGuard;

pub use keyset::{KdfParams, KeysetStore};

pub use manager::{Backend, FileSecretManager, KeyRotator, SecretManager};

pub use metadata::KeysetMetadataStore;

pub use records::SecretRecordStore;

pub use rotation::RotationCoordinator;
