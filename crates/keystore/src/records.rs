//! One encrypted record per secret, one file per record.
//!
//! Records live at `<root>/<name>.secret` as JSON. Reads are gated by
//! [`PermissionGuard::check_file`]; writes go through [`atomic::write_private`]
//! so a record file is never observed half-written or group/world readable.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::atomic;
use crate::error::{Error, Result};
use crate::guard::PermissionGuard;
use crate::metadata::METADATA_FILE;
use crate::types::{SecretName, SecretRecord};

/// File extension of record files.
pub const SECRET_EXTENSION: &str = "secret";

/// Filesystem-backed record storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct SecretRecordStore {
    root: PathBuf,
}

impl SecretRecordStore {
    /// Creates a store over `root`. Does not touch the filesystem.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the records.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for `name`.
    #[must_use]
    pub fn path_for(&self, name: &SecretName) -> PathBuf {
        self.root.join(format!("{name}.{SECRET_EXTENSION}"))
    }

    /// Writes `record` for `name`, replacing any existing record atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] or [`Error::StorageIo`].
    pub fn put(&self, name: &SecretName, record: &SecretRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        atomic::write_private(&self.path_for(name), &bytes)?;
        debug!(key = %name, key_version = record.key_version, "stored record");
        Ok(())
    }

    /// Loads the record for `name` after vetting its file permissions.
    ///
    /// # Errors
    ///
    /// - [`Error::SecretNotFound`] if no record exists.
    /// - [`Error::InsecureFile`] if the file is not owner-only; the contents
    ///   are not read in that case.
    /// - [`Error::StorageIo`] or [`Error::Serialization`] otherwise.
    pub fn get(&self, name: &SecretName) -> Result<SecretRecord> {
        let path = self.path_for(name);
        PermissionGuard::check_file(&path).map_err(|e| match e {
            Error::FileNotFound { .. } => Error::SecretNotFound {
                key: name.to_string(),
            },
            other => other,
        })?;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SecretNotFound {
                    key: name.to_string(),
                });
            }
            Err(e) => return Err(Error::io(&path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
            reason: format!("record '{name}': {e}"),
        })
    }

    /// Removes the record for `name`. Succeeds if it was already absent.
    ///
    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageIo`] if removal fails for another reason.
    pub fn delete(&self, name: &SecretName) -> Result<bool> {
        let removed = atomic::remove_if_exists(&self.path_for(name))?;
        debug!(key = %name, removed, "deleted record");
        Ok(removed)
    }

    /// Lists the names of all records, sorted.
    ///
    /// Only regular `*.secret` files count; the metadata file, hidden
    /// temporary files, and sub-directories are skipped, as are files whose
    /// stem is not a valid secret name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageIo`] if the directory cannot be read.
    pub fn list_keys(&self) -> Result<Vec<SecretName>> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
            if file_type.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name == METADATA_FILE || file_name.starts_with('.') {
                continue;
            }
            let Some(stem) = file_name.strip_suffix(&format!(".{SECRET_EXTENSION}")) else {
                continue;
            };

            match SecretName::new(stem) {
                Ok(name) => names.push(name),
                Err(e) => warn!(file = file_name, error = %e, "skipping unrecognised record file"),
            }
        }

        names.sort();
        Ok(names)
    }
}
