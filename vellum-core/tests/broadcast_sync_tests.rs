// broadcast_sync_tests.rs
// Two contexts sharing a collection name through one broadcast hub

use crossbeam::channel::Receiver;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vellum_core::broadcast::channel_name;
use vellum_core::{
    ChangeEvent, CommitMode, Database, DatabaseOptions, FindOptions, JsonEvaluator, LocalBroadcast,
    MemoryObjectStore, MemoryStorage, ObjectStore, PersistentStorage, Registrar, Storage,
    StoreConfig,
};

const WAIT: Duration = Duration::from_secs(5);

fn context(hub: &LocalBroadcast, name: &str) -> MemoryStorage {
    MemoryStorage::open(name, &StoreConfig::default(), hub, Arc::new(JsonEvaluator)).unwrap()
}

fn next_event(events: &Receiver<ChangeEvent>) -> ChangeEvent {
    events.recv_timeout(WAIT).expect("broadcast should arrive")
}

#[test]
fn test_insert_in_a_is_visible_in_b() {
    let hub = LocalBroadcast::new();
    let a = context(&hub, "users");
    let b = context(&hub, "users");
    let b_events = b.subscribe();

    a.insert_one(json!({"id": "user-1", "name": "John Doe"})).unwrap();

    match next_event(&b_events) {
        ChangeEvent::InsertOne(doc) => assert_eq!(doc.id(), "user-1"),
        other => panic!("unexpected event {:?}", other),
    }
    let seen = b.find_by_id("user-1").unwrap().unwrap();
    assert_eq!(seen.get("name"), Some(&json!("John Doe")));
}

#[test]
fn test_inbound_changes_are_not_reposted() {
    let hub = LocalBroadcast::new();
    let a = context(&hub, "users");
    let b = context(&hub, "users");
    let a_events = a.subscribe();
    let b_events = b.subscribe();

    a.insert_one(json!({"id": "user-1"})).unwrap();
    assert!(matches!(next_event(&a_events), ChangeEvent::InsertOne(_)));
    assert!(matches!(next_event(&b_events), ChangeEvent::InsertOne(_)));

    // B applied the change without echoing it back to A
    assert!(a_events.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(a.count(&json!({})).unwrap(), 1);
}

#[test]
fn test_update_remove_and_flush_converge() {
    let hub = LocalBroadcast::new();
    let a = context(&hub, "users");
    let b = context(&hub, "users");
    let b_events = b.subscribe();

    a.insert_many(vec![json!({"id": "user-1", "n": 1}), json!({"id": "user-2", "n": 2})])
        .unwrap();
    next_event(&b_events);

    // Prime B's cache, then change the data from A
    assert_eq!(b.find(&json!({"n": {"$gt": 1}}), &FindOptions::new()).unwrap().len(), 1);
    a.update_many(&json!({}), &json!({"$inc": {"n": 10}})).unwrap();
    assert!(matches!(next_event(&b_events), ChangeEvent::UpdateMany(docs) if docs.len() == 2));
    assert_eq!(b.find(&json!({"n": {"$gt": 1}}), &FindOptions::new()).unwrap().len(), 2);

    a.remove(&json!({"id": "user-1"})).unwrap();
    assert!(matches!(next_event(&b_events), ChangeEvent::Remove(_)));
    assert!(!b.has("user-1"));

    a.flush().unwrap();
    assert_eq!(next_event(&b_events), ChangeEvent::Flush);
    assert_eq!(b.count(&json!({})).unwrap(), 0);
}

#[test]
fn test_other_collections_are_isolated() {
    let hub = LocalBroadcast::new();
    let users = context(&hub, "users");
    let posts = context(&hub, "posts");
    let post_events = posts.subscribe();

    users.insert_one(json!({"id": "user-1"})).unwrap();
    assert!(post_events.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(!posts.has("user-1"));
}

#[test]
fn test_destroy_releases_subscription() {
    let hub = LocalBroadcast::new();
    let a = context(&hub, "users");
    let b = context(&hub, "users");
    assert_eq!(hub.subscribers(&channel_name("users")), 2);

    b.destroy();
    assert_eq!(hub.subscribers(&channel_name("users")), 1);
    a.insert_one(json!({"id": "user-1"})).unwrap();
    assert!(!b.has("user-1"));
}

#[test]
fn test_broadcast_does_not_persist_in_receiver() {
    let hub = LocalBroadcast::new();
    let store_a = Arc::new(MemoryObjectStore::new());
    let store_b = Arc::new(MemoryObjectStore::new());
    let options = || {
        DatabaseOptions::new("app")
            .register(Registrar::new("users"))
            .with_config(StoreConfig::default().with_commit_mode(CommitMode::Manual))
    };
    let db_a: Database<PersistentStorage> = Database::open(options(), store_a.clone(), &hub).unwrap();
    let db_b: Database<PersistentStorage> = Database::open(options(), store_b.clone(), &hub).unwrap();

    let b_users = db_b.collection("users").unwrap();
    let b_events = b_users.subscribe();
    db_a.collection("users")
        .unwrap()
        .insert_one(json!({"id": "user-1", "name": "John Doe"}))
        .unwrap();
    next_event(&b_events);

    assert!(b_users.find_by_id("user-1").unwrap().is_some());
    assert_eq!(b_users.storage().pending().pending_len(), 0, "receiver queues nothing");

    db_a.close().unwrap();
    db_b.close().unwrap();
    assert_eq!(store_a.get_all("users").unwrap().len(), 1);
    assert!(store_b.get_all("users").unwrap().is_empty());
}
