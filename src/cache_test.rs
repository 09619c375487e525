use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::store::memory::MemoryBoardStore;

fn individual_config() -> CacheConfig {
    CacheConfig {
        mode: Mode::Individual,
        unified_board_id: "unified".into(),
        max_age: Duration::from_secs(30),
        capacity: 3,
        max_entry_bytes: 64 * 1024,
    }
}

fn seeded_store(ids: &[&str]) -> Arc<dyn BoardStore> {
    let store = MemoryBoardStore::new();
    for id in ids {
        store.put_public_board(id, "Test", 5);
    }
    Arc::new(store)
}

#[tokio::test]
async fn get_loads_on_miss_and_serves_from_cache() {
    let cache = BoardCache::new(individual_config());
    let store = seeded_store(&["alpha"]);

    let doc = cache.get(&store, "alpha").await.expect("load should succeed");
    assert_eq!(doc.id, "alpha");
    assert_eq!(cache.len(), 1);
    assert!(cache.lookup("alpha").is_some());
}

#[tokio::test]
async fn unknown_board_is_not_found() {
    let cache = BoardCache::new(individual_config());
    let store = seeded_store(&[]);

    let err = cache.get(&store, "ghost").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn expired_entries_are_reloaded() {
    let mut config = individual_config();
    config.max_age = Duration::ZERO;
    let cache = BoardCache::new(config);
    let store = seeded_store(&["alpha"]);

    cache.get(&store, "alpha").await.expect("first load");
    // Zero TTL: the entry is stale the moment it lands.
    assert!(cache.lookup("alpha").is_none());
    let doc = cache.get(&store, "alpha").await.expect("reload");
    assert_eq!(doc.id, "alpha");
}

#[tokio::test]
async fn invalidate_removes_entry_immediately() {
    let cache = BoardCache::new(individual_config());
    let store = seeded_store(&["alpha"]);

    cache.get(&store, "alpha").await.expect("load");
    cache.invalidate("alpha");
    assert!(cache.lookup("alpha").is_none());
    assert!(cache.is_empty());
}

#[test]
fn oversize_documents_are_never_admitted() {
    let mut config = individual_config();
    config.max_entry_bytes = 128;
    let cache = BoardCache::new(config);

    let big = BoardDoc::blank("big", "Huge", 10);
    cache.admit("big", &big);
    assert!(cache.lookup("big").is_none());
}

#[test]
fn capacity_overflow_evicts_oldest_inserted() {
    let cache = BoardCache::new(individual_config());
    for id in ["a", "b", "c", "d"] {
        cache.admit(id, &BoardDoc::blank(id, "T", 2));
    }

    assert_eq!(cache.len(), 3);
    assert!(cache.lookup("a").is_none(), "oldest entry should be evicted");
    assert!(cache.lookup("d").is_some());
}

#[test]
fn readmitting_refreshes_insertion_order() {
    let cache = BoardCache::new(individual_config());
    for id in ["a", "b", "c"] {
        cache.admit(id, &BoardDoc::blank(id, "T", 2));
    }
    // Touch "a" again, then overflow: "b" is now the oldest.
    cache.admit("a", &BoardDoc::blank("a", "T", 2));
    cache.admit("d", &BoardDoc::blank("d", "T", 2));

    assert!(cache.lookup("a").is_some());
    assert!(cache.lookup("b").is_none());
}

#[test]
fn individual_mode_sanitizes_ids() {
    let cache = BoardCache::new(individual_config());

    assert_eq!(cache.resolve("board_7-x").unwrap(), "board_7-x");
    assert!(matches!(cache.resolve(""), Err(EngineError::Validation(_))));
    assert!(matches!(cache.resolve("no spaces"), Err(EngineError::Validation(_))));
    assert!(matches!(cache.resolve("semi;colon"), Err(EngineError::Validation(_))));
    assert!(matches!(cache.resolve(&"x".repeat(65)), Err(EngineError::Validation(_))));
}

#[test]
fn unified_mode_resolves_everything_to_one_board() {
    let mut config = individual_config();
    config.mode = Mode::Unified;
    let cache = BoardCache::new(config);

    assert_eq!(cache.resolve("whatever").unwrap(), "unified");
    assert_eq!(cache.resolve("").unwrap(), "unified");
    assert_eq!(cache.resolve("bad;id").unwrap(), "unified");
}
