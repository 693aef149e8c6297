//! Persistence of the rotation metadata file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::atomic;
use crate::error::{Error, Result};
use crate::guard::PermissionGuard;
use crate::types::KeysetMetadata;

/// File name of the rotation metadata inside the store root.
pub const METADATA_FILE: &str = "keyset_metadata.json";

/// Loads and saves [`KeysetMetadata`] as a single owner-only JSON file.
#[derive(Debug, Clone)]
pub struct KeysetMetadataStore {
    path: PathBuf,
}

impl KeysetMetadataStore {
    /// Creates a store for the metadata file under `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(METADATA_FILE),
        }
    }

    /// Path of the metadata file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the metadata, or `None` for a fresh store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsecureFile`] if the file exists with a loose mode,
    /// [`Error::Serialization`] if it is corrupt, or [`Error::StorageIo`].
    pub fn load(&self) -> Result<Option<KeysetMetadata>> {
        match PermissionGuard::check_file(&self.path) {
            Ok(()) => {}
            Err(Error::FileNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        let raw = fs::read(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let metadata: KeysetMetadata =
            serde_json::from_slice(&raw).map_err(|e| Error::Serialization {
                reason: format!("{}: {e}", self.path.display()),
            })?;

        if metadata.current_version == 0 {
            return Err(Error::Serialization {
                reason: format!("{}: current_version must be at least 1", self.path.display()),
            });
        }

        debug!(version = metadata.current_version, "loaded keyset metadata");
        Ok(Some(metadata))
    }

    /// Atomically overwrites the metadata file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] or [`Error::StorageIo`].
    pub fn save(&self, metadata: &KeysetMetadata) -> Result<()> {
        let raw = serde_json::to_vec_pretty(metadata)?;
        atomic::write_private(&self.path, &raw)?;
        debug!(version = metadata.current_version, "saved keyset metadata");
        Ok(())
    }
}
