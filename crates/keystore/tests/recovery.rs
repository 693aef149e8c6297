//! Recovery from rotations interrupted by a crash.
//!
//! A crash is simulated by staging (and optionally committing) a rotation
//! with the low-level stores and never promoting it, then opening the store
//! with a fresh manager.

mod helpers;

use std::fs;

use helpers::{TestStore, read_record};
use keystore::{
    KeyRotator, KeysetMetadataStore, KeysetStore, RotationCoordinator, SecretManager,
    SecretRecordStore,
};

/// Stages a rotation on `store` and abandons it before promotion.
fn crash_mid_rotation(store: &TestStore) {
    let records = SecretRecordStore::new(&store.root);
    let metadata_store = KeysetMetadataStore::new(&store.root);
    let keyset = KeysetStore::new(&store.root, None);

    let engine = keyset.load().expect("keyset").expect("present");
    let metadata = metadata_store.load().expect("metadata").expect("present");

    let coordinator = RotationCoordinator::new(&records, &metadata_store, &keyset);
    let committed = coordinator
        .stage(&engine, &metadata, None)
        .expect("stage");
    drop(committed);
}

fn seeded_store() -> TestStore {
    let store = TestStore::new();
    let manager = store.open();
    manager.set_secret("one", b"first").expect("set");
    manager.set_secret("two", b"second").expect("set");
    manager.close().expect("close");
    store
}

#[test]
fn test_committed_rotation_is_rolled_forward() {
    let store = seeded_store();
    crash_mid_rotation(&store);

    // Live records still carry the old version until recovery.
    assert_eq!(read_record(&store.record_path("one"))["key_version"], 1);
    assert!(store.root.join(".rotation").join("commit.json").exists());

    let manager = store.open();
    assert_eq!(manager.key_metadata().expect("metadata").current_version, 2);
    assert_eq!(read_record(&store.record_path("one"))["key_version"], 2);
    assert_eq!(read_record(&store.record_path("two"))["key_version"], 2);
    assert_eq!(manager.get_secret("one").expect("get").as_bytes(), b"first");
    assert_eq!(manager.get_secret("two").expect("get").as_bytes(), b"second");
    assert!(!store.root.join(".rotation").exists());
}

#[test]
fn test_uncommitted_rotation_is_discarded() {
    let store = seeded_store();
    crash_mid_rotation(&store);
    fs::remove_file(store.root.join(".rotation").join("commit.json")).expect("remove journal");

    let manager = store.open();
    assert_eq!(manager.key_metadata().expect("metadata").current_version, 1);
    assert_eq!(read_record(&store.record_path("one"))["key_version"], 1);
    assert_eq!(manager.get_secret("one").expect("get").as_bytes(), b"first");
    assert!(!store.root.join(".rotation").exists());

    manager.rotate_keys().expect("rotation after recovery");
    assert_eq!(manager.key_metadata().expect("metadata").current_version, 2);
}

#[test]
fn test_partially_promoted_rotation_completes() {
    let store = seeded_store();
    crash_mid_rotation(&store);

    // Promote a single record by hand, as if the crash hit mid-promotion.
    let staging = store.root.join(".rotation");
    fs::rename(staging.join("one.secret"), store.record_path("one")).expect("rename");

    let manager = store.open();
    assert_eq!(manager.get_secret("one").expect("get").as_bytes(), b"first");
    assert_eq!(manager.get_secret("two").expect("get").as_bytes(), b"second");
    assert_eq!(manager.key_metadata().expect("metadata").current_version, 2);
}

#[test]
fn test_stale_temp_files_are_removed() {
    let store = seeded_store();
    let stray = store.root.join(".tmp-interrupted");
    fs::write(&stray, b"half a record").expect("write");

    let manager = store.open();
    assert!(!stray.exists());
    let keys: Vec<String> = manager
        .list_secrets()
        .expect("list")
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(keys, vec!["one", "two"]);
}
