//! The secret manager facade.
//!
//! [`FileSecretManager`] owns the active key and metadata snapshot behind a
//! single reader/writer lock. Reads ([`SecretManager::get_secret`],
//! [`SecretManager::status`], [`KeyRotator::key_metadata`]) share the lock;
//! everything that mutates the store or the manager takes it exclusively,
//! including the whole rotation sweep.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --close--> Closed
//!       ^                            |
//!       +--- failed promotion -------+
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::atomic;
use crate::cipher::CipherEngine;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::guard::PermissionGuard;
use crate::keyset::KeysetStore;
use crate::metadata::KeysetMetadataStore;
use crate::records::SecretRecordStore;
use crate::rotation::RotationCoordinator;
use crate::types::{KeysetMetadata, RotationPolicy, SecretName, SecretRecord, SecretValue, Status};

const STATUS_UNINITIALIZED: &str = "secret manager not initialized";
const STATUS_CLOSED: &str = "secret manager closed";
const STATUS_OPERATIONAL: &str = "secret manager operational";

/// Basic secret storage operations.
pub trait SecretManager: Send + Sync {
    /// Opens (or creates) the store described by `config`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyInitialized`] if called twice, with
    /// [`Error::NotInitialized`] after [`close`](Self::close), and with the
    /// underlying storage or permission error otherwise. A failed call leaves
    /// the manager uninitialized.
    fn initialize(&self, config: Config) -> Result<()>;

    /// Retrieves and decrypts the secret stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::SecretNotFound`], [`Error::InsecureFile`],
    /// [`Error::InsecureDirectory`], or [`Error::DecryptionError`].
    fn get_secret(&self, key: &str) -> Result<SecretValue>;

    /// Encrypts and stores `value` under `key`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidSecretKey`], [`Error::InsecureDirectory`],
    /// or a storage error. A failed call leaves no partial record.
    fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes the secret stored under `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidSecretKey`], [`Error::InsecureDirectory`],
    /// or a storage error.
    fn delete_secret(&self, key: &str) -> Result<()>;

    /// Lists the keys of all stored secrets, sorted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InsecureDirectory`] or a storage error.
    fn list_secrets(&self) -> Result<Vec<SecretName>>;

    /// Reports health. Never fails; an unusable manager reports unhealthy.
    fn status(&self) -> Status;

    /// Releases the in-memory key. All later operations fail with
    /// [`Error::NotInitialized`].
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for backends that
    /// release external resources.
    fn close(&self) -> Result<()>;
}

/// Key rotation on top of [`SecretManager`].
pub trait KeyRotator: SecretManager {
    /// Replaces the active key and re-encrypts every secret under it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RotationFailed`]; unless the failure happened after
    /// commit, the store and the active key are unchanged.
    fn rotate_keys(&self) -> Result<()>;

    /// Returns a snapshot of the rotation metadata.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotInitialized`].
    fn key_metadata(&self) -> Result<KeysetMetadata>;
}

/// Available secret manager implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Encrypted files on the local filesystem.
    #[default]
    File,
}

impl Backend {
    /// Creates an uninitialized manager of this kind.
    #[must_use]
    pub fn create(self) -> Box<dyn KeyRotator> {
        match self {
            Self::File => Box::new(FileSecretManager::new()),
        }
    }

    /// The configuration name of this backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            other => Err(Error::Config {
                reason: format!("unknown backend '{other}'"),
            }),
        }
    }
}

enum State {
    Uninitialized,
    Initialized(Box<ActiveState>),
    Closed,
}

struct ActiveState {
    root: PathBuf,
    records: SecretRecordStore,
    metadata_store: KeysetMetadataStore,
    keyset: KeysetStore,
    engine: CipherEngine,
    metadata: KeysetMetadata,
    policy: Option<RotationPolicy>,
}

impl ActiveState {
    fn open(config: &Config) -> Result<Self> {
        let location = config.resolve_storage()?;
        atomic::create_private_dir(&location.path, location.is_default)?;
        PermissionGuard::check_directory(&location.path)?;

        let root = location.path;
        let records = SecretRecordStore::new(&root);
        let metadata_store = KeysetMetadataStore::new(&root);
        let keyset = KeysetStore::new(&root, config.master_password.clone())
            .with_kdf_params(config.kdf.unwrap_or_default());

        RotationCoordinator::new(&records, &metadata_store, &keyset).recover()?;

        let policy = config.rotation_policy.clone();
        let (engine, metadata) = match (keyset.load()?, metadata_store.load()?) {
            (Some(engine), Some(metadata)) => {
                if engine.version() != metadata.current_version {
                    return Err(Error::KeysetMismatch {
                        keyset_version: engine.version(),
                        metadata_version: metadata.current_version,
                    });
                }
                (engine, metadata)
            }
            (None, None) => {
                let engine = CipherEngine::generate(1);
                let metadata = KeysetMetadata::initial(Utc::now(), policy.as_ref());
                keyset.save(&engine)?;
                metadata_store.save(&metadata)?;
                info!(path = %root.display(), "created secret store");
                (engine, metadata)
            }
            (Some(engine), None) if engine.version() == 1 => {
                warn!(path = %root.display(), "metadata missing for initial keyset; recreating");
                let metadata = KeysetMetadata::initial(Utc::now(), policy.as_ref());
                metadata_store.save(&metadata)?;
                (engine, metadata)
            }
            (Some(engine), None) => {
                return Err(Error::KeysetMismatch {
                    keyset_version: engine.version(),
                    metadata_version: 0,
                });
            }
            (None, Some(metadata)) => {
                let existing = records.list_keys()?;
                if !existing.is_empty() {
                    return Err(Error::DecryptionError {
                        reason: format!(
                            "keyset missing; {} existing secrets cannot be decrypted",
                            existing.len()
                        ),
                    });
                }
                warn!(path = %root.display(), "keyset missing for empty store; generating key");
                let engine = CipherEngine::generate(metadata.current_version);
                keyset.save(&engine)?;
                (engine, metadata)
            }
        };

        if !keyset.is_protected() {
            warn!(
                path = %root.display(),
                "no master password configured; data key is protected by file permissions only"
            );
        }

        info!(
            path = %root.display(),
            version = metadata.current_version,
            protected = keyset.is_protected(),
            "secret manager initialized"
        );

        Ok(Self {
            root,
            records,
            metadata_store,
            keyset,
            engine,
            metadata,
            policy,
        })
    }

    fn check_root(&self) -> Result<()> {
        PermissionGuard::check_directory(&self.root)
    }
}

/// A [`SecretManager`] storing one encrypted file per secret.
pub struct FileSecretManager {
    state: RwLock<State>,
}

impl FileSecretManager {
    /// Creates an uninitialized manager.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(State::Uninitialized),
        }
    }

    /// Creates and initializes a manager in one step.
    ///
    /// # Errors
    ///
    /// See [`SecretManager::initialize`].
    pub fn open(config: Config) -> Result<Self> {
        let manager = Self::new();
        manager.initialize(config)?;
        Ok(manager)
    }

    /// The store root, if initialized.
    #[must_use]
    pub fn storage_path(&self) -> Option<PathBuf> {
        match &*self.state.read() {
            State::Initialized(active) => Some(active.root.clone()),
            State::Uninitialized | State::Closed => None,
        }
    }
}

impl Default for FileSecretManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileSecretManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.read() {
            State::Uninitialized => "uninitialized",
            State::Initialized(_) => "initialized",
            State::Closed => "closed",
        };
        f.debug_struct("FileSecretManager")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

fn active(state: &State) -> Result<&ActiveState> {
    match state {
        State::Initialized(active) => Ok(&**active),
        State::Uninitialized | State::Closed => Err(Error::NotInitialized),
    }
}

fn active_mut(state: &mut State) -> Result<&mut ActiveState> {
    match state {
        State::Initialized(active) => Ok(&mut **active),
        State::Uninitialized | State::Closed => Err(Error::NotInitialized),
    }
}

impl SecretManager for FileSecretManager {
    fn initialize(&self, config: Config) -> Result<()> {
        let mut state = self.state.write();
        match &*state {
            State::Uninitialized => {}
            State::Initialized(_) => return Err(Error::AlreadyInitialized),
            State::Closed => return Err(Error::NotInitialized),
        }

        *state = State::Initialized(Box::new(ActiveState::open(&config)?));
        Ok(())
    }

    fn get_secret(&self, key: &str) -> Result<SecretValue> {
        let state = self.state.read();
        let active = active(&state)?;
        let name = SecretName::new(key)?;
        active.check_root()?;

        let record = active.records.get(&name)?;
        let plaintext = active.engine.decrypt(&name, &record.ciphertext)?;
        debug!(key = %name, key_version = record.key_version, "read secret");
        Ok(SecretValue::new(plaintext))
    }

    fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let state = self.state.write();
        let active = active(&state)?;
        let name = SecretName::new(key)?;
        active.check_root()?;

        let ciphertext = active.engine.encrypt(&name, value)?;
        let record = match active.records.get(&name) {
            Ok(mut existing) => {
                existing.reencrypted(ciphertext, active.engine.version());
                existing
            }
            Err(e) => {
                if !e.is_not_found() {
                    debug!(key = %name, error = %e, "existing record unreadable; replacing");
                }
                SecretRecord::new(ciphertext, active.engine.version())
            }
        };

        active.records.put(&name, &record)
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        let state = self.state.write();
        let active = active(&state)?;
        let name = SecretName::new(key)?;
        active.check_root()?;

        active.records.delete(&name).map(|_| ())
    }

    fn list_secrets(&self) -> Result<Vec<SecretName>> {
        let state = self.state.read();
        let active = active(&state)?;
        active.check_root()?;
        active.records.list_keys()
    }

    fn status(&self) -> Status {
        let state = self.state.read();
        let active = match &*state {
            State::Initialized(active) => active,
            State::Uninitialized => return Status::unhealthy(STATUS_UNINITIALIZED),
            State::Closed => return Status::unhealthy(STATUS_CLOSED),
        };

        let (healthy, message) = match active.check_root() {
            Ok(()) => (true, STATUS_OPERATIONAL.to_string()),
            Err(e) => (false, e.to_string()),
        };

        Status {
            healthy,
            message,
            last_rotated: Some(active.metadata.last_rotated),
            rotation_due: active.metadata.rotation_due(Utc::now()),
        }
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if let State::Initialized(active) = &*state {
            info!(path = %active.root.display(), "secret manager closed");
        }
        *state = State::Closed;
        Ok(())
    }
}

impl KeyRotator for FileSecretManager {
    fn rotate_keys(&self) -> Result<()> {
        let mut state = self.state.write();
        let active = active_mut(&mut state)?;
        active.check_root()?;

        let outcome = {
            let coordinator =
                RotationCoordinator::new(&active.records, &active.metadata_store, &active.keyset);
            let committed =
                coordinator.stage(&active.engine, &active.metadata, active.policy.as_ref())?;
            committed.promote()
        };

        match outcome {
            Ok((engine, metadata)) => {
                active.engine = engine;
                active.metadata = metadata;
                Ok(())
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "rotation committed but not promoted; manager must be reinitialized"
                );
                *state = State::Uninitialized;
                Err(e)
            }
        }
    }

    fn key_metadata(&self) -> Result<KeysetMetadata> {
        let state = self.state.read();
        active(&state).map(|active| active.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::KdfParams;
    use std::path::Path;

    const TEST_KDF: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    fn config(dir: &Path) -> Config {
        Config::new(dir.join("store"))
    }

    #[test]
    fn uninitialized_operations_fail() {
        let manager = FileSecretManager::new();
        assert!(matches!(
            manager.get_secret("k"),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.set_secret("k", b"v"),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.delete_secret("k"),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(manager.rotate_keys(), Err(Error::NotInitialized)));
        assert!(matches!(manager.key_metadata(), Err(Error::NotInitialized)));

        let status = manager.status();
        assert!(!status.healthy);
        assert_eq!(status.message, STATUS_UNINITIALIZED);
    }

    #[test]
    fn set_get_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::open(config(dir.path())).expect("open");

        manager.set_secret("api-key", b"abc123").expect("set");
        assert_eq!(
            manager.get_secret("api-key").expect("get").as_bytes(),
            b"abc123"
        );

        manager.delete_secret("api-key").expect("delete");
        assert!(manager.get_secret("api-key").expect_err("gone").is_not_found());
        manager.delete_secret("api-key").expect("delete is idempotent");
    }

    #[test]
    fn invalid_key_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::open(config(dir.path())).expect("open");
        assert!(matches!(
            manager.set_secret("../escape", b"v"),
            Err(Error::InvalidSecretKey { .. })
        ));
    }

    #[test]
    fn overwrite_preserves_created_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::open(config(dir.path())).expect("open");
        manager.set_secret("k", b"one").expect("set");

        let records = SecretRecordStore::new(dir.path().join("store"));
        let name = SecretName::new("k").expect("name");
        let first = records.get(&name).expect("record");

        manager.set_secret("k", b"two").expect("overwrite");
        let second = records.get(&name).expect("record");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(manager.get_secret("k").expect("get").as_bytes(), b"two");
    }

    #[test]
    fn double_initialize_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::open(config(dir.path())).expect("open");
        assert!(matches!(
            manager.initialize(config(dir.path())),
            Err(Error::AlreadyInitialized)
        ));
    }

    #[test]
    fn close_is_terminal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::open(config(dir.path())).expect("open");
        manager.set_secret("k", b"v").expect("set");
        manager.close().expect("close");

        assert!(matches!(manager.get_secret("k"), Err(Error::NotInitialized)));
        assert!(matches!(
            manager.initialize(config(dir.path())),
            Err(Error::NotInitialized)
        ));
        assert_eq!(manager.status().message, STATUS_CLOSED);
        manager.close().expect("close twice");
    }

    #[test]
    fn failed_initialize_can_be_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::new();
        let missing_parent = Config::new(dir.path().join("a").join("b"));
        assert!(matches!(
            manager.initialize(missing_parent),
            Err(Error::StorageIo { .. })
        ));
        manager.initialize(config(dir.path())).expect("retry");
        assert!(manager.status().healthy);
    }

    #[test]
    fn rotate_updates_metadata_and_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = FileSecretManager::open(
            config(dir.path()).with_rotation_policy(RotationPolicy::every(3600)),
        )
        .expect("open");
        manager.set_secret("k", b"v").expect("set");

        let before = manager.key_metadata().expect("metadata");
        manager.rotate_keys().expect("rotate");
        let after = manager.key_metadata().expect("metadata");

        assert_eq!(after.current_version, before.current_version + 1);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.next_rotation.is_some());
        assert_eq!(manager.get_secret("k").expect("get").as_bytes(), b"v");

        let status = manager.status();
        assert!(status.healthy);
        assert_eq!(status.last_rotated, Some(after.last_rotated));
        assert!(!status.rotation_due);
    }

    #[test]
    fn password_protected_store_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = || {
            config(dir.path())
                .with_master_password("pw")
                .with_kdf_params(TEST_KDF)
        };

        let first = FileSecretManager::open(cfg()).expect("open");
        first.set_secret("k", b"persisted").expect("set");
        first.close().expect("close");

        let second = FileSecretManager::open(cfg()).expect("reopen");
        assert_eq!(
            second.get_secret("k").expect("get").as_bytes(),
            b"persisted"
        );
    }

    #[test]
    fn keyset_version_mismatch_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        FileSecretManager::open(config(dir.path()))
            .expect("open")
            .close()
            .expect("close");

        let root = dir.path().join("store");
        let metadata_store = KeysetMetadataStore::new(&root);
        let mut meta = metadata_store.load().expect("load").expect("present");
        meta.current_version = 5;
        metadata_store.save(&meta).expect("save");

        assert!(matches!(
            FileSecretManager::open(config(dir.path())),
            Err(Error::KeysetMismatch {
                keyset_version: 1,
                metadata_version: 5
            })
        ));
    }

    #[test]
    fn backend_factory() {
        assert_eq!("file".parse::<Backend>().expect("parse"), Backend::File);
        assert!("vault".parse::<Backend>().is_err());
        assert_eq!(Backend::File.to_string(), "file");

        let manager = Backend::default().create();
        assert!(!manager.status().healthy);
    }
}
