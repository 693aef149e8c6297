//! Transactional key rotation.
//!
//! Rotation never mutates a live file before it commits. Every record is
//! re-encrypted into a staging directory, the new keyset is sealed next to
//! them, and only then is a journal holding the new metadata written. The
//! journal's existence is the commit point:
//!
//! - a crash before it leaves the live store untouched, and the staging
//!   directory is discarded on the next start;
//! - a crash after it is rolled forward on the next start by
//!   [`RotationCoordinator::recover`].
//!
//! Promotion renames staged files over live ones, so every individual file
//! flips atomically and re-running promotion is harmless.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::atomic::{self, TEMP_PREFIX};
use crate::cipher::CipherEngine;
use crate::error::{Error, Result};
use crate::guard::PermissionGuard;
use crate::keyset::{KEYSET_FILE, KeysetStore};
use crate::metadata::KeysetMetadataStore;
use crate::records::SecretRecordStore;
use crate::types::{KeysetMetadata, RotationPolicy};

/// Staging directory inside the store root.
pub const STAGING_DIR: &str = ".rotation";

/// Journal file inside [`STAGING_DIR`]; its presence marks a committed rotation.
pub const JOURNAL_FILE: &str = "commit.json";

/// Drives rotation across the record, metadata and keyset stores of one root.
#[derive(Debug)]
pub struct RotationCoordinator<'a> {
    records: &'a SecretRecordStore,
    metadata: &'a KeysetMetadataStore,
    keyset: &'a KeysetStore,
}

/// A rotation that has been written to staging and committed, but whose files
/// have not yet replaced the live ones.
#[derive(Debug)]
#[must_use = "a committed rotation must be promoted"]
pub struct CommittedRotation<'a> {
    coordinator: &'a RotationCoordinator<'a>,
    engine: CipherEngine,
    metadata: KeysetMetadata,
    records: usize,
}

impl<'a> RotationCoordinator<'a> {
    /// Creates a coordinator over the given stores, which must share a root.
    #[must_use]
    pub const fn new(
        records: &'a SecretRecordStore,
        metadata: &'a KeysetMetadataStore,
        keyset: &'a KeysetStore,
    ) -> Self {
        Self {
            records,
            metadata,
            keyset,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.records.root().join(STAGING_DIR)
    }

    /// Re-encrypts every record under a fresh key into staging and commits.
    ///
    /// On error nothing live has changed and the staging directory is gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RotationFailed`] naming the record (or stage) at which
    /// the sweep stopped.
    pub fn stage(
        &'a self,
        current: &CipherEngine,
        metadata: &KeysetMetadata,
        policy: Option<&RotationPolicy>,
    ) -> Result<CommittedRotation<'a>> {
        let staging = self.staging_dir();
        let result = self.stage_into(&staging, current, metadata, policy);
        if result.is_err() {
            discard(&staging);
        }
        result
    }

    fn stage_into(
        &'a self,
        staging: &Path,
        current: &CipherEngine,
        metadata: &KeysetMetadata,
        policy: Option<&RotationPolicy>,
    ) -> Result<CommittedRotation<'a>> {
        let failed = |key: &str, e: &dyn std::fmt::Display| Error::RotationFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let next_version = metadata
            .current_version
            .checked_add(1)
            .ok_or_else(|| failed("keyset", &"key version exhausted"))?;
        let next = CipherEngine::generate(next_version);

        if fs::symlink_metadata(staging).is_ok() {
            warn!(path = %staging.display(), "removing stale rotation staging");
            fs::remove_dir_all(staging).map_err(|e| failed(STAGING_DIR, &e))?;
        }
        atomic::create_private_dir(staging, false).map_err(|e| failed(STAGING_DIR, &e))?;

        let staged = SecretRecordStore::new(staging);
        let names = self.records.list_keys().map_err(|e| failed("list", &e))?;

        for name in &names {
            let mut record = self.records.get(name).map_err(|e| failed(name.as_str(), &e))?;
            if record.key_version != current.version() {
                warn!(
                    key = %name,
                    record_version = record.key_version,
                    active_version = current.version(),
                    "record key version differs from active key"
                );
            }

            let mut plaintext = current
                .decrypt(name, &record.ciphertext)
                .map_err(|e| failed(name.as_str(), &e))?;
            let sealed = next.encrypt(name, &plaintext);
            plaintext.zeroize();

            record.reencrypted(sealed.map_err(|e| failed(name.as_str(), &e))?, next_version);
            staged.put(name, &record).map_err(|e| failed(name.as_str(), &e))?;
        }

        self.keyset
            .relocated(staging)
            .save(&next)
            .map_err(|e| failed("keyset", &e))?;

        let new_metadata = metadata.rotated(Utc::now(), policy);
        let journal = serde_json::to_vec_pretty(&new_metadata).map_err(|e| failed("commit", &e))?;
        atomic::write_private(&staging.join(JOURNAL_FILE), &journal)
            .map_err(|e| failed("commit", &e))?;

        debug!(version = next_version, records = names.len(), "rotation committed to staging");
        Ok(CommittedRotation {
            coordinator: self,
            engine: next,
            metadata: new_metadata,
            records: names.len(),
        })
    }

    /// Finishes or discards a rotation interrupted by a crash, and removes
    /// leftover temporary files from the store root.
    ///
    /// Returns the metadata of a rolled-forward rotation, if there was one.
    ///
    /// # Errors
    ///
    /// Returns an error if a committed rotation cannot be promoted; the store
    /// must not be used until recovery succeeds.
    pub fn recover(&self) -> Result<Option<KeysetMetadata>> {
        self.sweep_temp_files();

        let staging = self.staging_dir();
        if fs::symlink_metadata(&staging).is_err() {
            return Ok(None);
        }

        let journal = staging.join(JOURNAL_FILE);
        match PermissionGuard::check_file(&journal) {
            Ok(()) => {}
            Err(Error::FileNotFound { .. }) => {
                warn!(path = %staging.display(), "discarding uncommitted rotation");
                fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let raw = fs::read(&journal).map_err(|e| Error::io(&journal, e))?;
        let metadata: KeysetMetadata =
            serde_json::from_slice(&raw).map_err(|e| Error::Serialization {
                reason: format!("{}: {e}", journal.display()),
            })?;

        self.promote(&staging, &metadata)?;
        info!(version = metadata.current_version, "completed interrupted key rotation");
        Ok(Some(metadata))
    }

    fn promote(&self, staging: &Path, metadata: &KeysetMetadata) -> Result<()> {
        let staged = SecretRecordStore::new(staging);
        for name in staged.list_keys()? {
            atomic::replace(&staged.path_for(&name), &self.records.path_for(&name))?;
        }

        let staged_keyset = staging.join(KEYSET_FILE);
        if staged_keyset.exists() {
            atomic::replace(&staged_keyset, self.keyset.path())?;
        }

        self.metadata.save(metadata)?;
        fs::remove_dir_all(staging).map_err(|e| Error::io(staging, e))
    }

    fn sweep_temp_files(&self) {
        let root = self.records.root();
        let Ok(entries) = fs::read_dir(root) else {
            return;
        };
        for entry in entries.flatten() {
            let is_temp = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(TEMP_PREFIX));
            if is_temp {
                warn!(path = %entry.path().display(), "removing stale temporary file");
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "cannot remove temporary file"
                    );
                }
            }
        }
    }
}

impl CommittedRotation<'_> {
    /// Moves the staged files over the live ones.
    ///
    /// Returns the new engine and metadata to install as active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RotationFailed`] if a rename fails. The rotation stays
    /// committed; [`RotationCoordinator::recover`] completes it.
    pub fn promote(self) -> Result<(CipherEngine, KeysetMetadata)> {
        let staging = self.coordinator.staging_dir();
        self.coordinator
            .promote(&staging, &self.metadata)
            .map_err(|e| Error::RotationFailed {
                key: "promote".to_string(),
                reason: format!("{e}; rotation is committed and completes on next initialize"),
            })?;

        info!(
            version = self.metadata.current_version,
            records = self.records,
            "key rotation complete"
        );
        Ok((self.engine, self.metadata))
    }

    /// The version the rotation moves to.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.metadata.current_version
    }
}

fn discard(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %e, "cannot remove rotation staging");
        }
    } else {
        warn!(path = %staging.display(), "rolled back rotation staging");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SecretName, SecretRecord};

    struct Fixture {
        _dir: tempfile::TempDir,
        records: SecretRecordStore,
        metadata: KeysetMetadataStore,
        keyset: KeysetStore,
        engine: CipherEngine,
        meta: KeysetMetadata,
    }

    fn fixture(secrets: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let records = SecretRecordStore::new(&root);
        let metadata = KeysetMetadataStore::new(&root);
        let keyset = KeysetStore::new(&root, None);

        let engine = CipherEngine::generate(1);
        let meta = KeysetMetadata::initial(Utc::now(), None);
        keyset.save(&engine).expect("keyset");
        metadata.save(&meta).expect("metadata");

        for (key, value) in secrets {
            let name = SecretName::new(*key).expect("name");
            let ciphertext = engine.encrypt(&name, value.as_bytes()).expect("encrypt");
            records
                .put(&name, &SecretRecord::new(ciphertext, 1))
                .expect("put");
        }

        Fixture {
            _dir: dir,
            records,
            metadata,
            keyset,
            engine,
            meta,
        }
    }

    fn read(records: &SecretRecordStore, engine: &CipherEngine, key: &str) -> String {
        let name = SecretName::new(key).expect("name");
        let record = records.get(&name).expect("record");
        String::from_utf8(engine.decrypt(&name, &record.ciphertext).expect("decrypt"))
            .expect("utf-8")
    }

    #[test]
    fn stage_and_promote_reencrypts_everything() {
        let fx = fixture(&[("a", "alpha"), ("b", "beta")]);
        let coordinator = RotationCoordinator::new(&fx.records, &fx.metadata, &fx.keyset);

        let committed = coordinator.stage(&fx.engine, &fx.meta, None).expect("stage");
        assert_eq!(committed.version(), 2);

        // Live files are untouched until promotion.
        assert_eq!(read(&fx.records, &fx.engine, "a"), "alpha");

        let (engine, meta) = committed.promote().expect("promote");
        assert_eq!(engine.version(), 2);
        assert_eq!(meta.current_version, 2);
        assert_eq!(read(&fx.records, &engine, "a"), "alpha");
        assert_eq!(read(&fx.records, &engine, "b"), "beta");

        for name in fx.records.list_keys().expect("list") {
            assert_eq!(fx.records.get(&name).expect("get").key_version, 2);
        }
        assert_eq!(fx.metadata.load().expect("load"), Some(meta));
        assert_eq!(
            fx.keyset.load().expect("keyset").expect("present").version(),
            2
        );
        assert!(!fx.records.root().join(STAGING_DIR).exists());
    }

    #[test]
    fn failed_sweep_leaves_store_untouched() {
        let fx = fixture(&[("good", "value")]);
        let bad = SecretName::new("bad").expect("name");
        // Sealed under an unrelated key, so the sweep cannot decrypt it.
        let foreign = CipherEngine::generate(1)
            .encrypt(&bad, b"x")
            .expect("encrypt");
        fx.records
            .put(&bad, &SecretRecord::new(foreign, 1))
            .expect("put");
        let before = fs::read(fx.records.path_for(&bad)).expect("read");

        let coordinator = RotationCoordinator::new(&fx.records, &fx.metadata, &fx.keyset);
        let err = coordinator
            .stage(&fx.engine, &fx.meta, None)
            .expect_err("must fail");

        assert!(matches!(err, Error::RotationFailed { ref key, .. } if key == "bad"));
        assert_eq!(fs::read(fx.records.path_for(&bad)).expect("read"), before);
        assert_eq!(read(&fx.records, &fx.engine, "good"), "value");
        assert_eq!(fx.metadata.load().expect("load"), Some(fx.meta.clone()));
        assert!(!fx.records.root().join(STAGING_DIR).exists());
    }

    #[test]
    fn recover_rolls_forward_committed_rotation() {
        let fx = fixture(&[("a", "alpha")]);
        let coordinator = RotationCoordinator::new(&fx.records, &fx.metadata, &fx.keyset);

        // Commit, then "crash" before promotion.
        let committed = coordinator.stage(&fx.engine, &fx.meta, None).expect("stage");
        drop(committed);

        let recovered = coordinator.recover().expect("recover").expect("rolled forward");
        assert_eq!(recovered.current_version, 2);

        let engine = fx.keyset.load().expect("keyset").expect("present");
        assert_eq!(engine.version(), 2);
        assert_eq!(read(&fx.records, &engine, "a"), "alpha");
        assert!(!fx.records.root().join(STAGING_DIR).exists());
    }

    #[test]
    fn recover_discards_uncommitted_staging() {
        let fx = fixture(&[("a", "alpha")]);
        let coordinator = RotationCoordinator::new(&fx.records, &fx.metadata, &fx.keyset);

        let committed = coordinator.stage(&fx.engine, &fx.meta, None).expect("stage");
        drop(committed);
        fs::remove_file(fx.records.root().join(STAGING_DIR).join(JOURNAL_FILE))
            .expect("drop journal");

        assert!(coordinator.recover().expect("recover").is_none());
        assert!(!fx.records.root().join(STAGING_DIR).exists());
        assert_eq!(read(&fx.records, &fx.engine, "a"), "alpha");
        assert_eq!(fx.metadata.load().expect("load"), Some(fx.meta.clone()));
    }

    #[test]
    fn recover_sweeps_temp_files() {
        let fx = fixture(&[]);
        let stray = fx.records.root().join(format!("{TEMP_PREFIX}abc"));
        fs::write(&stray, b"partial").expect("write");

        let coordinator = RotationCoordinator::new(&fx.records, &fx.metadata, &fx.keyset);
        assert!(coordinator.recover().expect("recover").is_none());
        assert!(!stray.exists());
    }

    #[test]
    fn empty_store_rotation_bumps_version() {
        let fx = fixture(&[]);
        let coordinator = RotationCoordinator::new(&fx.records, &fx.metadata, &fx.keyset);
        let policy = RotationPolicy::every(86_400);

        let (_, meta) = coordinator
            .stage(&fx.engine, &fx.meta, Some(&policy))
            .expect("stage")
            .promote()
            .expect("promote");
        assert_eq!(meta.current_version, 2);
        assert_eq!(
            meta.next_rotation,
            policy.next_rotation_after(meta.last_rotated)
        );
    }
}
