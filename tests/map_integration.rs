//! Integration tests for file-backed stores and maps.
//!
//! Each test works on its own database under a temporary directory.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use num_bigint::BigInt;
use sqlmap::{Error, Location, MapOptions, SqlMap, Store, StoreConfig, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

fn file_store(dir: &TempDir) -> Store {
    Store::open(StoreConfig::new(dir.path().join("db/store.db"))).unwrap()
}

fn user(name: &str, age: i64) -> Value {
    [("name", Value::from(name)), ("age", Value::from(age))]
        .into_iter()
        .collect()
}

#[test]
fn test_injection_name_is_contained() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);

    let victim = store.get_or_create_map("test", MapOptions::default()).unwrap();
    victim.set("survivor", &Value::from(true)).unwrap();

    let map = store
        .get_or_create_map("(DROP TABLE test)", MapOptions::default())
        .unwrap();
    assert_eq!(map.name(), "_DROP_TABLE_test_");
    map.set("x", &Value::from(1)).unwrap();

    assert_eq!(victim.get("survivor").unwrap(), Some(Value::from(true)));
    assert_eq!(map.get("x").unwrap(), Some(Value::from(1)));
    assert_eq!(
        store.map_names(),
        vec!["_DROP_TABLE_test_".to_string(), "test".to_string()]
    );
}

#[test]
fn test_upsert_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let users = store.get_or_create_map("users", MapOptions::default()).unwrap();

    users.set("u1", &user("alice", 30)).unwrap();
    users.set("u1", &user("alice", 30)).unwrap();
    users.set("u1", &user("alice", 31)).unwrap();

    assert_eq!(users.size().unwrap(), 1);
    assert_eq!(users.get("u1").unwrap(), Some(user("alice", 31)));
}

#[test]
fn test_has_agrees_with_get() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let map = store.get_or_create_map("agree", MapOptions::uncached()).unwrap();

    map.set("present", &Value::Null).unwrap();

    assert!(map.has("present").unwrap());
    assert_eq!(map.get("present").unwrap(), Some(Value::Null));
    assert!(!map.has("absent").unwrap());
    assert_eq!(map.get("absent").unwrap(), None);
}

#[test]
fn test_delete_then_has() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let map = store.get_or_create_map("deletes", MapOptions::default()).unwrap();

    map.set("gone", &Value::from("soon")).unwrap();
    assert!(map.delete("gone").unwrap());

    assert!(!map.has("gone").unwrap());
    assert_eq!(map.get("gone").unwrap(), None);
    assert_eq!(map.size().unwrap(), 0);
}

#[test]
fn test_entries_and_for_each_agree() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::new(dir.path().join("iter.db")).with_page_size(4)).unwrap();
    let map = store.get_or_create_map("walk", MapOptions::default()).unwrap();
    for i in 0..25 {
        map.set(&format!("id-{i:03}"), &Value::from(i)).unwrap();
    }

    let from_entries: Vec<(String, Value)> = map.entries().map(Result::unwrap).collect();

    let mut from_callback = Vec::new();
    let visited = map
        .for_each(|value, id, _| from_callback.push((id, value)))
        .unwrap();

    let from_default: Vec<(String, Value)> = (&map).into_iter().map(Result::unwrap).collect();

    assert_eq!(visited, 25);
    assert_eq!(from_entries, from_callback);
    assert_eq!(from_entries, from_default);
    assert_eq!(
        map.keys().map(Result::unwrap).collect::<Vec<_>>(),
        from_entries.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>()
    );
}

/// Applies the same operations to `map` and returns everything observable.
fn exercise(map: &SqlMap) -> Vec<String> {
    let mut seen = Vec::new();
    map.set("a", &Value::from(1)).unwrap();
    map.set("b", &Value::from("two")).unwrap();
    seen.push(format!("{:?}", map.get("a").unwrap()));
    map.set("a", &Value::from(10)).unwrap();
    seen.push(format!("{:?}", map.get("a").unwrap()));
    seen.push(format!("{:?}", map.has("b").unwrap()));
    map.delete("b").unwrap();
    seen.push(format!("{:?}", map.has("b").unwrap()));
    seen.push(format!("{:?}", map.get("b").unwrap()));
    seen.push(format!("{:?}", map.size().unwrap()));
    map.clear().unwrap();
    seen.push(format!("{:?}", map.get("a").unwrap()));
    seen
}

#[test]
fn test_cache_is_transparent() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);

    let cached = store.get_or_create_map("cached", MapOptions::cached()).unwrap();
    let uncached = store.get_or_create_map("uncached", MapOptions::uncached()).unwrap();

    assert_eq!(exercise(&cached), exercise(&uncached));
}

#[test]
fn test_store_level_cache_switch() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(
        StoreConfig::new(dir.path().join("nocache.db")).with_cache_enabled(false),
    )
    .unwrap();

    let default = store.get_or_create_map("plain", MapOptions::default()).unwrap();
    default.set("k", &Value::from(1)).unwrap();
    assert_eq!(default.cache_len(), 0);

    let forced = store.get_or_create_map("forced", MapOptions::cached()).unwrap();
    forced.set("k", &Value::from(1)).unwrap();
    assert_eq!(forced.cache_len(), 1);
}

#[test]
fn test_teardown_closes_maps() {
    let dir = TempDir::new().unwrap();
    let mut store = file_store(&dir);
    let map = store.get_or_create_map("closing", MapOptions::default()).unwrap();
    let clone = map.clone();
    map.set("k", &Value::from(1)).unwrap();

    store.teardown().unwrap();

    assert!(map.is_closed());
    assert!(matches!(clone.has("k"), Err(Error::Closed { .. })));
    assert!(matches!(clone.entries().next(), Some(Err(Error::Closed { .. }))));
    assert!(matches!(store.teardown(), Err(Error::NotInitialized)));
}

#[test]
fn test_reopen_persists_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("persist/store.db");

    {
        let mut store = Store::open(StoreConfig::new(&path)).unwrap();
        let map = store.get_or_create_map("kept", MapOptions::default()).unwrap();
        map.set("u1", &user("bob", 40)).unwrap();
        store.teardown().unwrap();
    }

    let store = Store::open(StoreConfig::new(&path)).unwrap();
    assert!(matches!(store.location(), Location::File { .. }));
    let map = store.get_or_create_map("kept", MapOptions::default()).unwrap();
    assert_eq!(map.get("u1").unwrap(), Some(user("bob", 40)));
}

#[test]
fn test_backup_is_readable() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let map = store.get_or_create_map("source", MapOptions::default()).unwrap();
    for i in 0..50 {
        map.set(&i.to_string(), &Value::from(i)).unwrap();
    }

    let target = dir.path().join("backups/nightly/copy.db");
    store.backup(&target).unwrap();
    // The source keeps working after a backup.
    map.set("after", &Value::from(true)).unwrap();

    let copy = Store::open(StoreConfig::new(&target)).unwrap();
    let restored = copy.get_or_create_map("source", MapOptions::default()).unwrap();
    assert_eq!(restored.size().unwrap(), 50);
    assert_eq!(restored.get("42").unwrap(), Some(Value::from(42)));
    assert!(!restored.has("after").unwrap());
}

#[test]
fn test_bigint_and_infinity_survive_storage() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let map = store.get_or_create_map("numbers", MapOptions::uncached()).unwrap();

    let value: Value = [
        ("a", Value::BigInt(BigInt::from(1212))),
        ("b", Value::infinity()),
    ]
    .into_iter()
    .collect();
    map.set("u1", &value).unwrap();

    let stored = map.get("u1").unwrap().unwrap();
    assert_eq!(stored, value);
    assert_eq!(
        stored.get("a").and_then(Value::as_bigint),
        Some(&BigInt::from(1212))
    );
    assert_eq!(stored.get("b").and_then(Value::as_f64), Some(f64::INFINITY));
}

#[test]
fn test_unencodable_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let map = store.get_or_create_map("floats", MapOptions::default()).unwrap();

    let nested: Value = [("x", Value::Float(f64::NEG_INFINITY))].into_iter().collect();
    assert!(matches!(map.set("bad", &nested), Err(Error::InvalidInput(_))));
    assert!(!map.has("bad").unwrap());
}

#[test]
fn test_early_break_then_write() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::new(dir.path().join("early.db")).with_page_size(2)).unwrap();
    let map = store.get_or_create_map("early", MapOptions::default()).unwrap();
    for i in 0..10 {
        map.set(&format!("{i:02}"), &Value::from(i)).unwrap();
    }

    let first_three: BTreeMap<String, Value> = map.entries().take(3).map(Result::unwrap).collect();
    assert_eq!(first_three.len(), 3);

    map.set("late", &Value::from("ok")).unwrap();
    assert_eq!(map.clear().unwrap(), 11);
}

#[tokio::test]
async fn test_async_callers_and_sweeper() {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::new(dir.path().join("async.db"))
        .with_sweep_interval(Duration::from_millis(20));
    // Any entry read less than a million times an hour is cold.
    config.cache.min_hourly_rate = 1_000_000.0;

    let mut store = Store::open(config).unwrap();
    let map = store.get_or_create_map("async", MapOptions::default()).unwrap();

    // No await between the write and the check, so the sweeper cannot run.
    map.set("k", &Value::from("v")).unwrap();
    assert_eq!(map.cache_len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(map.cache_len(), 0);

    let value = map.blocking(|m| m.get("k")).await.unwrap();
    assert_eq!(value, Some(Value::from("v")));

    store.teardown().unwrap();
}
