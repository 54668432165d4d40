//! Query Tests
//!
//! Predicate evaluation and result shaping through the public store API.

use jotdb::query::QueryError;
use jotdb::{FetchOptions, FetchOutcome, Filter, Store, StoreConfig, StoreError};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

async fn store_with_nums(dir: &TempDir, nums: &[i64]) -> Store {
    let store = Store::open(dir.path().join("q.jot")).unwrap();
    for (i, n) in nums.iter().enumerate() {
        let key = format!("doc{}", i);
        store.set(&key, json!({ "num": n })).await.unwrap();
    }
    store
}

fn nums(outcome: FetchOutcome) -> Vec<Value> {
    outcome
        .into_documents()
        .into_iter()
        .map(|d| d["num"].clone())
        .collect()
}

// =============================================================================
// Predicates
// =============================================================================

#[tokio::test]
async fn test_gte_selects_subset() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[50, 72, 100, 150]).await;

    let outcome = store
        .fetch(&json!({"num": {"$gte": 72}}), FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(nums(outcome), vec![json!(72), json!(100), json!(150)]);
}

#[tokio::test]
async fn test_or_branches() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[82, 100, 150]).await;

    let outcome = store
        .fetch(
            &json!({"$or": [{"num": {"$gt": 82}}, {"num": {"$eq": 82}}]}),
            FetchOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.len(), 3);
}

#[tokio::test]
async fn test_predicate_on_key_property() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[1, 2, 3]).await;

    let outcome = store
        .fetch(&json!({"_key": {"$regex": "^doc[12]$"}}), FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(nums(outcome), vec![json!(2), json!(3)]);
}

#[tokio::test]
async fn test_prebuilt_filter() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[5, 15, 25]).await;
    let filter = Filter::parse(&json!([{"num": 5}, {"num": {"$gt": 20}}])).unwrap();

    let outcome = store.query(&filter, &FetchOptions::new()).await.unwrap();

    assert_eq!(nums(outcome), vec![json!(5), json!(25)]);
}

// =============================================================================
// Shaping
// =============================================================================

#[tokio::test]
async fn test_desc_limit() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[50, 72, 100, 150]).await;

    let outcome = store
        .fetch(&json!({}), FetchOptions::new().desc("num").limit(2))
        .await
        .unwrap();

    assert_eq!(nums(outcome), vec![json!(150), json!(100)]);
}

#[tokio::test]
async fn test_asc_skip_one() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[30, 10, 20]).await;

    let outcome = store
        .fetch(&json!({}), FetchOptions::new().asc("num").skip(1).one())
        .await
        .unwrap();

    match outcome {
        FetchOutcome::One(doc) => assert_eq!(doc["num"], 20),
        other => panic!("expected a single document, got {:?}", other),
    }
}

#[tokio::test]
async fn test_results_and_sort_ties_follow_write_order() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("o.jot")).unwrap();
    store.set("zeta", json!({"n": 1})).await.unwrap();
    store.set("alpha", json!({"n": 1})).await.unwrap();
    store.set("mid", json!({"n": 0})).await.unwrap();
    store.set("zeta", json!({"n": 1, "seen": true})).await.unwrap();

    let keys = |outcome: FetchOutcome| -> Vec<String> {
        outcome
            .into_documents()
            .into_iter()
            .map(|d| d["_key"].as_str().unwrap().to_string())
            .collect()
    };

    let unsorted = store.fetch(&json!({}), FetchOptions::new()).await.unwrap();
    assert_eq!(keys(unsorted), vec!["zeta", "alpha", "mid"]);

    let asc = store.fetch(&json!({}), FetchOptions::new().asc("n")).await.unwrap();
    assert_eq!(keys(asc), vec!["mid", "zeta", "alpha"]);

    let desc = store.fetch(&json!({}), FetchOptions::new().desc("n")).await.unwrap();
    assert_eq!(keys(desc), vec!["zeta", "alpha", "mid"]);

    store.remove("zeta").await.unwrap();
    store.set("zeta", json!({"n": 1})).await.unwrap();
    let readded = store.fetch(&json!({}), FetchOptions::new().asc("n")).await.unwrap();
    assert_eq!(keys(readded), vec!["mid", "alpha", "zeta"]);
}

#[tokio::test]
async fn test_no_records_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[1, 2]).await;

    let outcome = store
        .fetch(&json!({"num": {"$gt": 100}}), FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome, FetchOutcome::NoRecords);
}

#[tokio::test]
async fn test_count() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[1, 2, 3, 4]).await;

    assert_eq!(store.count(&json!({})).await.unwrap(), 4);
    assert_eq!(store.count(&json!({"num": {"$in": [2, 4, 6]}})).await.unwrap(), 2);
    assert_eq!(
        store
            .fetch(&json!({"num": {"$lt": 3}}), FetchOptions::new().count())
            .await
            .unwrap(),
        FetchOutcome::Count(2)
    );
}

#[tokio::test]
async fn test_shallow_skips_large_uncached_documents() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path().join("s.jot")).with_cache_limit(32);
    let store = Store::open_with(config).unwrap();

    store.set("big", json!({"blob": "y".repeat(100)})).await.unwrap();
    store.set("small", json!({"n": 1})).await.unwrap();

    let shallow = store
        .fetch(&json!({}), FetchOptions::new().shallow())
        .await
        .unwrap()
        .into_documents();
    assert_eq!(shallow.len(), 1);
    assert_eq!(shallow[0]["_key"], "small");

    let deep = store.fetch(&json!({}), FetchOptions::new()).await.unwrap();
    assert_eq!(deep.len(), 2);
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_unknown_operator_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_with_nums(&dir, &[1]).await;

    let err = store
        .fetch(&json!({"num": {"$between": [1, 2]}}), FetchOptions::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        StoreError::Query(QueryError::UnknownOperator("$between".into()))
    );
}
