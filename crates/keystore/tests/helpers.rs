//! Shared fixtures for keystore integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use keystore::{Config, FileSecretManager, KdfParams};
use tempfile::TempDir;

/// Argon2id parameters cheap enough for tests.
pub const TEST_KDF: KdfParams = KdfParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

/// A temporary directory with a store root inside it.
pub struct TestStore {
    pub dir: TempDir,
    pub root: PathBuf,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("secrets");
        Self { dir, root }
    }

    pub fn config(&self) -> Config {
        Config::new(&self.root)
    }

    pub fn config_with_password(&self, password: &str) -> Config {
        self.config()
            .with_master_password(password)
            .with_kdf_params(TEST_KDF)
    }

    pub fn open(&self) -> FileSecretManager {
        FileSecretManager::open(self.config()).expect("open store")
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.secret"))
    }
}

/// Reads a record file as JSON.
pub fn read_record(path: &Path) -> serde_json::Value {
    let raw = fs::read(path).expect("read record");
    serde_json::from_slice(&raw).expect("record json")
}

#[cfg(unix)]
pub fn chmod(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("chmod");
}

#[cfg(unix)]
pub fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).expect("stat").permissions().mode() & 0o777
}
