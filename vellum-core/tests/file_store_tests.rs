// file_store_tests.rs
// File-backed databases: write-behind durability, reopen, crash recovery, compaction

use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use vellum_core::object_store::FileObjectStore;
use vellum_core::{
    CommitMode, Database, DatabaseOptions, ExportOptions, IndexSpec, ObjectStore,
    PersistentStorage, Registrar, Storage, StoreConfig, VellumError,
};

fn options(mode: CommitMode) -> DatabaseOptions {
    DatabaseOptions::new("app")
        .register(Registrar::new("users").with_index(IndexSpec::new("email").unique()))
        .register(Registrar::new("posts"))
        .with_config(StoreConfig::default().with_commit_mode(mode))
}

fn open(path: &Path, mode: CommitMode) -> Database<PersistentStorage> {
    Database::open_file(path, options(mode)).unwrap()
}

#[test]
fn test_close_and_reopen_restores_collections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");

    {
        let db = open(&path, CommitMode::WriteBehind);
        let users = db.collection("users").unwrap();
        users
            .insert_many(vec![
                json!({"id": "user-1", "name": "John Doe", "email": "john.doe@test.none"}),
                json!({"id": "user-2", "name": "Jane Doe", "email": "jane.doe@test.none"}),
            ])
            .unwrap();
        users
            .update_one(&json!({"id": "user-2"}), &json!({"$set": {"name": "Jane Smith"}}))
            .unwrap();
        db.collection("posts").unwrap().insert_one(json!({"id": "post-1"})).unwrap();
        db.close().unwrap();
    }

    let db = open(&path, CommitMode::WriteBehind);
    let users = db.collection("users").unwrap();
    assert_eq!(users.count(&json!({})).unwrap(), 2);
    assert_eq!(
        users.find_by_id("user-2").unwrap().unwrap().get("name"),
        Some(&json!("Jane Smith"))
    );
    assert!(db.collection("posts").unwrap().storage().has("post-1"));
    db.close().unwrap();
}

#[test]
fn test_write_behind_commits_without_explicit_save() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");
    let db = open(&path, CommitMode::WriteBehind);
    db.collection("users").unwrap().insert_one(json!({"id": "user-1"})).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while db.export("users", &ExportOptions::default()).unwrap().is_empty() {
        assert!(Instant::now() < deadline, "commit worker never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
    db.close().unwrap();
}

#[test]
fn test_manual_mode_loses_unsaved_writes_on_crash() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");

    {
        let db = open(&path, CommitMode::Manual);
        let users = db.collection("users").unwrap();
        users.insert_one(json!({"id": "saved"})).unwrap();
        db.save().unwrap();
        users.insert_one(json!({"id": "unsaved"})).unwrap();
        // Dropped without close(): simulates the process dying
    }

    let db = open(&path, CommitMode::Manual);
    let users = db.collection("users").unwrap();
    assert!(users.storage().has("saved"));
    assert!(!users.storage().has("unsaved"));
}

#[test]
fn test_recovers_from_torn_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");

    {
        let db = open(&path, CommitMode::Manual);
        db.collection("users").unwrap().insert_one(json!({"id": "user-1"})).unwrap();
        db.close().unwrap();
    }

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xFF, 0xFF, 0x00]).unwrap();
    drop(file);

    let db = open(&path, CommitMode::Manual);
    let users = db.collection("users").unwrap();
    assert!(users.storage().has("user-1"));
    users.insert_one(json!({"id": "user-2"})).unwrap();
    db.close().unwrap();

    let db = open(&path, CommitMode::Manual);
    assert_eq!(db.collection("users").unwrap().count(&json!({})).unwrap(), 2);
}

#[test]
fn test_flush_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");

    {
        let db = open(&path, CommitMode::Manual);
        let users = db.collection("users").unwrap();
        users.insert_one(json!({"id": "user-1"})).unwrap();
        db.save().unwrap();
        db.flush().unwrap();
        db.close().unwrap();
    }

    let db = open(&path, CommitMode::Manual);
    assert_eq!(db.collection("users").unwrap().count(&json!({})).unwrap(), 0);
}

#[test]
fn test_compaction_keeps_live_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");

    {
        let db = open(&path, CommitMode::Manual);
        let users = db.collection("users").unwrap();
        users.insert_one(json!({"id": "user-1", "visits": 0})).unwrap();
        for _ in 0..25 {
            users
                .update_one(&json!({"id": "user-1"}), &json!({"$inc": {"visits": 1}}))
                .unwrap();
            db.save().unwrap();
        }
        db.close().unwrap();
    }

    let store = FileObjectStore::open(&path).unwrap();
    let before = store.file_len().unwrap();
    store.compact().unwrap();
    assert!(store.file_len().unwrap() < before);
    assert_eq!(store.store_names().unwrap(), vec!["posts", "users"]);
    store.close().unwrap();

    let db = open(&path, CommitMode::Manual);
    let user = db.collection("users").unwrap().find_by_id("user-1").unwrap().unwrap();
    assert_eq!(user.get("visits"), Some(&json!(25)));
}

#[test]
fn test_writes_before_hydration_cannot_shadow_durable_documents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.vlog");

    {
        let db = open(&path, CommitMode::Manual);
        db.collection("users")
            .unwrap()
            .insert_one(json!({"id": "user-1", "name": "Durable"}))
            .unwrap();
        db.close().unwrap();
    }

    let store: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::open(&path).unwrap());
    let config = StoreConfig::default().with_commit_mode(CommitMode::Manual);
    let storage = PersistentStorage::new("users", Arc::clone(&store), config).unwrap();

    let shadow = storage.insert_one(json!({"id": "user-1", "name": "Shadow"}));
    assert!(matches!(shadow, Err(VellumError::BackendUnavailable(_))));
    let removal = storage.remove(&json!({"name": "Durable"}));
    assert!(matches!(removal, Err(VellumError::BackendUnavailable(_))));

    storage.resolve().unwrap();
    let duplicate = storage.insert_one(json!({"id": "user-1", "name": "Shadow"}));
    assert!(matches!(duplicate, Err(VellumError::DuplicateDocument { .. })));
    storage.save().unwrap();

    let stored = store.get_all("users").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("name"), Some(&json!("Durable")));
    storage.destroy();
    store.close().unwrap();
}
