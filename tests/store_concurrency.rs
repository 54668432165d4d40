//! Commit Pipeline Tests
//!
//! Concurrent writers, batching, completion order and events.

use std::sync::Arc;

use futures_util::future::join_all;
use jotdb::observability::StoreEvent;
use jotdb::{Store, StoreError};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_two_writers_without_waiting() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("w.jot")).unwrap();
    store.ready().await.unwrap();

    let (a, b) = tokio::join!(
        store.set("a", json!({"who": "a"})),
        store.set("b", json!({"who": "b"})),
    );
    a.unwrap();
    b.unwrap();

    let metrics = store.metrics();
    assert_eq!(metrics.records_written, 2);
    assert!(metrics.batches >= 1 && metrics.batches <= 2);
    assert_eq!(store.get("a").await.unwrap()["who"], "a");
    assert_eq!(store.get("b").await.unwrap()["who"], "b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_write_concurrently() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(dir.path().join("w.jot")).unwrap());

    let tasks = (0..64).map(|i| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.set(&format!("k{:03}", i), json!({ "i": i })).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(store.len().unwrap(), 64);
    let metrics = store.metrics();
    assert_eq!(metrics.records_written, 64);
    assert!(metrics.batches <= 64);
    for i in [0, 31, 63] {
        assert_eq!(store.get(&format!("k{:03}", i)).await.unwrap()["i"], i);
    }
    assert_eq!(
        store.size().unwrap(),
        std::fs::metadata(dir.path().join("w.jot")).unwrap().len()
    );
}

#[tokio::test]
async fn test_same_key_writes_apply_in_call_order() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("w.jot")).unwrap();

    let writes = (0..20).map(|i| store.set("counter", json!({ "v": i })));
    for result in join_all(writes).await {
        result.unwrap();
    }

    assert_eq!(store.get("counter").await.unwrap()["v"], 19);
}

#[tokio::test]
async fn test_merges_see_staged_writes() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("w.jot")).unwrap();

    let (a, b, c, d) = tokio::join!(
        store.set("k", json!({"a": 1})),
        store.update("k", json!({"b": 2})),
        store.remove("k"),
        store.update("k", json!({"c": 3})),
    );

    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(c, Ok(()));
    assert_eq!(d, Err(StoreError::NoSuchKey("k".into())));
    assert_eq!(store.get("k").await, Err(StoreError::NotFound("k".into())));
}

#[tokio::test]
async fn test_commit_events() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("ev.jot")).unwrap();
    store.ready().await.unwrap();
    let mut events = store.subscribe();

    store.set("a", json!({})).await.unwrap();
    store.remove("a").await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(events.recv().await.unwrap().event);
    }
    assert_eq!(
        seen,
        vec![
            StoreEvent::Put { key: "a".into() },
            StoreEvent::Batch { size: 1 },
            StoreEvent::Del { key: "a".into() },
            StoreEvent::Batch { size: 1 },
        ]
    );

    store.close().await.unwrap();
    assert_eq!(events.recv().await.unwrap().event, StoreEvent::Closed);
}

#[tokio::test]
async fn test_flush_waits_for_earlier_writes() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("f.jot")).unwrap();

    let pending = store.write_batch(vec![]);
    assert!(pending.await.is_empty());

    let handle = store.clone();
    let write = tokio::spawn(async move { handle.set("a", json!({"n": 1})).await });
    write.await.unwrap().unwrap();
    store.flush().await.unwrap();

    assert!(store.contains("a").await.unwrap());
    assert_eq!(store.metrics().records_written, 1);
}
