//! Store configuration.
//!
//! A [`Config`] is handed to `initialize`. Every field is optional: the
//! storage path falls back to a per-user data directory, and without a
//! master password the data key is protected by file permissions alone.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::keyset::KdfParams;
use crate::types::RotationPolicy;

/// Application directory under the platform's local data directory.
pub const APP_DIR_NAME: &str = "keystore";

/// Sub-directory of [`APP_DIR_NAME`] holding the secret files.
pub const SECRETS_DIR_NAME: &str = "secrets";

/// Configuration for a secret manager.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for all store files.
    pub storage_path: Option<PathBuf>,
    /// Password wrapping the persisted data key.
    pub master_password: Option<MasterPassword>,
    /// Optional rotation schedule.
    pub rotation_policy: Option<RotationPolicy>,
    /// Argon2id cost used when sealing the keyset under the master password.
    pub kdf: Option<KdfParams>,
}

impl Config {
    /// Creates a configuration rooted at `storage_path`.
    #[must_use]
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: Some(storage_path.into()),
            ..Self::default()
        }
    }

    /// Sets the master password.
    #[must_use]
    pub fn with_master_password(mut self, password: impl Into<String>) -> Self {
        self.master_password = Some(MasterPassword::new(password));
        self
    }

    /// Sets the rotation policy.
    #[must_use]
    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = Some(policy);
        self
    }

    /// Sets the Argon2id cost parameters.
    #[must_use]
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = Some(kdf);
        self
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageIo`] if the file cannot be read and
    /// [`Error::Config`] if it is not a valid configuration document.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_slice(&raw).map_err(|e| Error::Config {
            reason: format!("{}: {e}", path.display()),
        })
    }

    /// Resolves where the store lives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no path is configured and the platform
    /// has no per-user data directory.
    pub fn resolve_storage(&self) -> Result<StorageLocation> {
        match &self.storage_path {
            Some(path) if path.as_os_str().is_empty() => Err(Error::Config {
                reason: "storage_path cannot be empty".to_string(),
            }),
            Some(path) => Ok(StorageLocation {
                path: path.clone(),
                is_default: false,
            }),
            None => default_storage_path().map(|path| StorageLocation {
                path,
                is_default: true,
            }),
        }
    }
}

/// A resolved storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// The directory holding all store files.
    pub path: PathBuf,
    /// Whether the path came from [`default_storage_path`]. Missing parents
    /// are only created for the default location.
    pub is_default: bool,
}

/// The fixed per-user location used when no storage path is configured.
///
/// # Errors
///
/// Returns [`Error::Config`] if the platform has no local data directory.
pub fn default_storage_path() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(SECRETS_DIR_NAME))
        .ok_or_else(|| Error::Config {
            reason: "no per-user data directory available; set storage_path".to_string(),
        })
}

/// The master password, zeroized on drop and redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct MasterPassword(String);

impl MasterPassword {
    /// Wraps a password.
    #[must_use]
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// Returns the password bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns true if the password is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MasterPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterPassword([REDACTED])")
    }
}
