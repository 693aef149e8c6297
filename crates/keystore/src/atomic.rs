//! Crash-safe file primitives.
//!
//! Files are written to a hidden temporary file in the destination directory,
//! created owner-only from the start, flushed, then renamed over the target.
//! A reader observes either the old file or the new one, never a torn write.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::guard::{DIR_MODE, FILE_MODE};

/// Prefix of in-flight temporary files; listings skip these.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Atomically replaces `path` with `bytes`, mode `0600`.
///
/// # Errors
///
/// Returns [`Error::StorageIo`] if the temporary file cannot be created,
/// written, synced, or renamed into place. On failure the target is untouched.
pub fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = parent_of(path)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))?;

    restrict_file(tmp.as_file()).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.write_all(bytes).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    sync_dir(dir);

    debug!(path = %path.display(), len = bytes.len(), "wrote file atomically");
    Ok(())
}

/// Renames `from` over `to` and syncs the destination directory.
///
/// # Errors
///
/// Returns [`Error::StorageIo`] if the rename fails.
pub fn replace(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::io(to, e))?;
    if let Ok(dir) = parent_of(to) {
        sync_dir(dir);
    }
    Ok(())
}

/// Removes `path`, treating an absent file as success.
///
/// Returns whether a file was actually removed.
///
/// # Errors
///
/// Returns [`Error::StorageIo`] for failures other than "not found".
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Creates `path` with mode `0700`.
///
/// With `recursive`, missing parents are created too; otherwise the parent
/// must already exist. An existing directory is left as is so the caller's
/// permission check decides whether it is acceptable.
///
/// # Errors
///
/// Returns [`Error::StorageIo`] if the directory cannot be created.
pub fn create_private_dir(path: &Path, recursive: bool) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }

    match builder.create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn parent_of(path: &Path) -> Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
            )
        })
}

#[cfg(unix)]
fn restrict_file(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(FILE_MODE))
}

#[cfg(not(unix))]
fn restrict_file(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_private_creates_and_replaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file.json");

        write_private(&path, b"first").expect("first write");
        assert_eq!(fs::read(&path).expect("read"), b"first");

        write_private(&path, b"second").expect("second write");
        assert_eq!(fs::read(&path).expect("read"), b"second");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn write_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file.json");
        fs::write(&path, b"old").expect("seed");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");

        write_private(&path, b"new").expect("write");
        let mode = fs::metadata(&path).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn write_private_into_missing_dir_fails_without_side_effects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("file.json");
        assert!(matches!(
            write_private(&path, b"x"),
            Err(Error::StorageIo { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone");
        fs::write(&path, b"x").expect("seed");

        assert!(remove_if_exists(&path).expect("first remove"));
        assert!(!remove_if_exists(&path).expect("second remove"));
    }

    #[cfg(unix)]
    #[test]
    fn create_private_dir_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let leaf = dir.path().join("store");
        create_private_dir(&leaf, false).expect("create leaf");
        let mode = fs::metadata(&leaf).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);

        create_private_dir(&leaf, false).expect("existing dir is fine");

        let deep = dir.path().join("a").join("b");
        assert!(create_private_dir(&deep, false).is_err());
        create_private_dir(&deep, true).expect("recursive");
        assert!(deep.is_dir());
    }
}
