//! Durable storage of the active data key.
//!
//! The data key is written to `keyset.json` next to the records. With a
//! master password it is sealed under a key-encryption key derived by
//! Argon2id from the password and a per-envelope random salt; without one it
//! is stored as is and protected by the owner-only file mode alone.

use std::fs;
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::atomic;
use crate::cipher::{self, CipherEngine, DataKey, KEY_SIZE};
use crate::config::MasterPassword;
use crate::error::{Error, Result};
use crate::guard::PermissionGuard;
use crate::types::b64;

/// File name of the keyset envelope inside the store root.
pub const KEYSET_FILE: &str = "keyset.json";

/// Salt length for key-encryption-key derivation.
pub const SALT_SIZE: usize = 16;

/// Argon2id cost parameters, recorded in each envelope so it can be opened
/// after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    fn derive(&self, password: &MasterPassword, salt: &[u8]) -> Result<DataKey> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| Error::KeyDerivation {
            reason: format!("invalid Argon2 params: {e}"),
        })?;

        let mut kek = [0u8; KEY_SIZE];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, &mut kek)
            .map_err(|e| Error::KeyDerivation {
                reason: format!("Argon2 failed: {e}"),
            })?;

        let key = DataKey::from_array(kek);
        kek.zeroize();
        Ok(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Protection {
    Argon2id,
    None,
}

/// The on-disk form of the data key.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct Envelope {
    #[zeroize(skip)]
    version: u32,
    #[zeroize(skip)]
    protection: Protection,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kdf: Option<KdfParams>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "b64")]
    salt: Vec<u8>,
    #[serde(with = "b64")]
    key: Vec<u8>,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
}

/// Loads and saves the data key of a store.
#[derive(Debug, Clone)]
pub struct KeysetStore {
    path: PathBuf,
    password: Option<MasterPassword>,
    kdf: KdfParams,
}

impl KeysetStore {
    /// Creates a store for the keyset file under `dir`.
    ///
    /// An empty password counts as no password.
    #[must_use]
    pub fn new(dir: &Path, password: Option<MasterPassword>) -> Self {
        Self {
            path: dir.join(KEYSET_FILE),
            password: password.filter(|p| !p.is_empty()),
            kdf: KdfParams::default(),
        }
    }

    /// Overrides the Argon2id cost used when sealing new envelopes.
    #[must_use]
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Returns the same configuration rooted at another directory.
    #[must_use]
    pub fn relocated(&self, dir: &Path) -> Self {
        Self {
            path: dir.join(KEYSET_FILE),
            password: self.password.clone(),
            kdf: self.kdf,
        }
    }

    /// Path of the keyset file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether new envelopes are sealed under a password.
    #[must_use]
    pub const fn is_protected(&self) -> bool {
        self.password.is_some()
    }

    /// Loads the persisted key, or `None` for a fresh store.
    ///
    /// # Errors
    ///
    /// - [`Error::DecryptionError`] if the envelope is sealed and the
    ///   configured password is wrong or missing.
    /// - [`Error::InsecureFile`] if the file mode is loose.
    /// - [`Error::Serialization`] or [`Error::StorageIo`] otherwise.
    pub fn load(&self) -> Result<Option<CipherEngine>> {
        match PermissionGuard::check_file(&self.path) {
            Ok(()) => {}
            Err(Error::FileNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        let mut raw = fs::read(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let parsed = serde_json::from_slice::<Envelope>(&raw);
        raw.zeroize();
        let envelope = parsed.map_err(|e| Error::Serialization {
            reason: format!("{}: {e}", self.path.display()),
        })?;

        let key = match envelope.protection {
            Protection::None => DataKey::from_bytes(&envelope.key)?,
            Protection::Argon2id => {
                let Some(password) = &self.password else {
                    return Err(Error::DecryptionError {
                        reason: "keyset is password protected but no master password is configured"
                            .to_string(),
                    });
                };
                let kdf = envelope.kdf.unwrap_or_default();
                let kek = kdf.derive(password, &envelope.salt)?;
                let mut plain = cipher::decrypt(&kek, &envelope.key).map_err(|_| {
                    Error::DecryptionError {
                        reason: "wrong master password or corrupted keyset".to_string(),
                    }
                })?;
                let key = DataKey::from_bytes(&plain);
                plain.zeroize();
                key?
            }
        };

        if envelope.protection == Protection::None && self.password.is_some() {
            warn!(
                path = %self.path.display(),
                "keyset is not password protected; it will be sealed at the next rotation"
            );
        }

        debug!(version = envelope.version, "loaded keyset");
        Ok(Some(CipherEngine::new(key, envelope.version)))
    }

    /// Persists `engine`'s key and version, replacing any existing keyset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDerivation`], [`Error::EncryptionError`],
    /// [`Error::Serialization`], or [`Error::StorageIo`].
    pub fn save(&self, engine: &CipherEngine) -> Result<()> {
        let envelope = match &self.password {
            Some(password) => {
                let mut salt = vec![0u8; SALT_SIZE];
                rand::thread_rng().fill_bytes(&mut salt);
                let kek = self.kdf.derive(password, &salt)?;
                Envelope {
                    version: engine.version(),
                    protection: Protection::Argon2id,
                    kdf: Some(self.kdf),
                    key: cipher::encrypt(&kek, engine.key().as_bytes())?,
                    salt,
                    created_at: Utc::now(),
                }
            }
            None => Envelope {
                version: engine.version(),
                protection: Protection::None,
                kdf: None,
                salt: Vec::new(),
                key: engine.key().as_bytes().to_vec(),
                created_at: Utc::now(),
            },
        };

        let mut raw = serde_json::to_vec_pretty(&envelope)?;
        let written = atomic::write_private(&self.path, &raw);
        raw.zeroize();
        written?;

        debug!(version = engine.version(), protected = self.is_protected(), "saved keyset");
        Ok(())
    }
}
