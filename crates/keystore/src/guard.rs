//! Owner-only permission checks.
//!
//! Every secret read is preceded by a check of the storage directory and the
//! record file. Checks fail closed: anything other than exactly `0700` on the
//! directory and exactly `0600` on a regular file is refused. Symlinks are
//! followed, so a store reached through a link is judged by its target.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Required mode of the storage directory.
pub const DIR_MODE: u32 = 0o700;

/// Required mode of every file in the store.
pub const FILE_MODE: u32 = 0o600;

/// Stateless permission validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionGuard;

impl PermissionGuard {
    /// Verifies that `path` is a directory accessible only by its owner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsecureDirectory`] if the path is missing, is not a
    /// directory, or has a mode other than `0700`.
    pub fn check_directory(path: &Path) -> Result<()> {
        let insecure = |reason: String| Error::InsecureDirectory {
            path: path.to_path_buf(),
            reason,
        };

        let meta = fs::metadata(path).map_err(|e| insecure(format!("cannot stat: {e}")))?;
        if !meta.is_dir() {
            return Err(insecure("not a directory".to_string()));
        }

        check_mode(&meta, DIR_MODE).map_err(insecure)
    }

    /// Verifies that `path` is a regular file readable and writable only by
    /// its owner.
    ///
    /// # Errors
    ///
    /// - [`Error::FileNotFound`] if the file does not exist.
    /// - [`Error::InsecureFile`] if it is not a regular file or has a mode
    ///   other than `0600`.
    /// - [`Error::StorageIo`] for any other stat failure.
    pub fn check_file(path: &Path) -> Result<()> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        let insecure = |reason: String| Error::InsecureFile {
            path: path.to_path_buf(),
            reason,
        };

        if !meta.is_file() {
            return Err(insecure("not a regular file".to_string()));
        }

        check_mode(&meta, FILE_MODE).map_err(insecure)
    }
}

#[cfg(unix)]
fn check_mode(meta: &fs::Metadata, want: u32) -> std::result::Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode() & 0o777;
    if mode == want {
        Ok(())
    } else {
        Err(format!("mode {mode:o}, want {want:o}"))
    }
}

// TODO: check owner-only ACLs on Windows instead of trusting the profile directory.
#[cfg(not(unix))]
fn check_mode(_meta: &fs::Metadata, _want: u32) -> std::result::Result<(), String> {
    Ok(())
}
