//! Cross-Context Integration Tests
//!
//! Several execution contexts sharing one in-process channel hub, plus the
//! restore and media flows a context runs through over its lifetime.

use std::sync::Arc;
use std::time::Duration;

use cache_coherence::broadcast::{
    BroadcastEnvelope, BroadcastSync, BroadcastWatermarks, ChannelTransport, LocalChannelHub,
    RefreshWatcher,
};
use cache_coherence::cache::{current_timestamp_ms, MemoryQueryCache, QueryCache, StaleTime};
use cache_coherence::cache_key;
use cache_coherence::media::{BinaryPayload, HandleRegistry, LocalHandleAllocator};
use cache_coherence::persist::{
    DurableStore, FileDurableStore, MemoryDurableStore, PersistedSnapshot, Persister,
};
use cache_coherence::value::{PendingOp, Value};

// == Helper Functions ==

fn cache() -> Arc<MemoryQueryCache> {
    Arc::new(MemoryQueryCache::new(StaleTime::Millis(60_000), 300_000))
}

fn watcher(
    hub: &LocalChannelHub,
    ctx: &str,
    cache: Arc<MemoryQueryCache>,
) -> Arc<RefreshWatcher<MemoryQueryCache>> {
    Arc::new(
        RefreshWatcher::new(
            cache,
            BroadcastSync::new(Arc::new(hub.context(ctx))),
            Arc::new(BroadcastWatermarks::new()),
            "query-sync",
        )
        .watch("groups-list", cache_key!["groups"]),
    )
}

// == Broadcast ==

#[tokio::test]
async fn test_three_contexts_converge_without_loops() {
    let hub = LocalChannelHub::default();
    let caches = [cache(), cache(), cache()];
    for c in &caches[1..] {
        c.set_data(cache_key!["groups"], Value::Null, 10);
    }
    let _handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .zip(caches.iter())
        .map(|(ctx, c)| watcher(&hub, ctx, c.clone()).spawn())
        .collect();

    let mut spy = hub.context("spy").open("query-sync").unwrap();
    caches[0].set_data(cache_key!["groups"], Value::Null, 500);

    let announced = tokio::time::timeout(Duration::from_millis(200), spy.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        BroadcastEnvelope::decode(announced),
        Some(BroadcastEnvelope::Refreshed(_))
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Both peers re-validate; their refetches stay local.
    for c in &caches[1..] {
        assert!(c.get_entry(&cache_key!["groups"]).unwrap().is_invalidated);
        c.set_data(cache_key!["groups"], Value::Null, 600);
    }
    let echo = tokio::time::timeout(Duration::from_millis(100), spy.recv()).await;
    assert!(echo.is_err());
}

#[tokio::test]
async fn test_unavailable_transport_keeps_context_working() {
    let c = cache();
    let w = Arc::new(
        RefreshWatcher::new(
            c.clone(),
            BroadcastSync::unavailable(),
            Arc::new(BroadcastWatermarks::new()),
            "query-sync",
        )
        .watch("groups-list", cache_key!["groups"]),
    );
    assert_eq!(w.groups().len(), 1);
    let handle = w.clone().spawn();
    assert!(!handle.is_subscribed());

    c.set_data(cache_key!["groups"], Value::Null, current_timestamp_ms());
    assert_eq!(w.invalidate(&cache_key!["groups"], true), 1);
}

// == Persistence ==

#[tokio::test]
async fn test_restore_drops_function_and_pending_fields() {
    let store = Arc::new(MemoryDurableStore::new());
    let persister = Persister::new(store.clone(), "query-cache")
        .with_allow_prefixes(["user-profile"])
        .with_buster("v1");

    let source = cache();
    let profile = Value::object([
        ("name", Value::from("Ada")),
        ("age", Value::from(36u64)),
        ("format", Value::function("format", |_| Value::Null)),
        ("avatar", Value::Pending(PendingOp::new())),
    ]);
    source.set_data(cache_key!["user-profile", "me"], profile, current_timestamp_ms());
    assert!(persister.persist_cache(source.as_ref()).await);

    let target = cache();
    assert_eq!(persister.restore_into(target.as_ref(), 300_000).await, 1);
    let data = target
        .get_entry(&cache_key!["user-profile", "me"])
        .unwrap()
        .data
        .unwrap();
    assert_eq!(data.get("name").unwrap().as_str(), Some("Ada"));
    assert_eq!(data.get("age").unwrap().as_u64(), Some(36));
    assert!(data.get("format").is_none());
    assert!(data.get("avatar").is_none());
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = cache_key!["groups", 3, "messages"];
    {
        let store = Arc::new(FileDurableStore::new(dir.path()));
        let persister = Persister::new(store, "query-cache")
            .with_allow_prefixes(["groups"])
            .with_buster("v1");
        let c = cache();
        c.set_data(key.clone(), Value::array([Value::from("hi")]), current_timestamp_ms());
        assert!(persister.persist_cache(c.as_ref()).await);
    }

    let store = Arc::new(FileDurableStore::new(dir.path()));
    let raw = store.get("query-cache").await.unwrap().unwrap();
    let snapshot = PersistedSnapshot::from_value(&raw).unwrap();
    assert_eq!(snapshot.entries[0].key, key);

    let persister = Persister::new(store, "query-cache")
        .with_allow_prefixes(["groups"])
        .with_buster("v1");
    let restored = cache();
    assert_eq!(persister.restore_into(restored.as_ref(), 300_000).await, 1);
    assert!(restored.get_entry(&key).is_some());
}

// == Media ==

#[tokio::test]
async fn test_reacquire_within_idle_window_returns_same_handle() {
    let allocator = Arc::new(LocalHandleAllocator::new());
    let registry = HandleRegistry::new(allocator.clone(), Duration::from_millis(60));
    let blob_a = BinaryPayload::new(vec![0xFF, 0xD8], "image/jpeg");

    let handle = registry.acquire("img1", &blob_a);
    assert_eq!(registry.ref_count("img1"), Some(1));
    assert_eq!(registry.acquire("img1", &blob_a), handle);
    assert_eq!(registry.ref_count("img1"), Some(2));

    registry.release("img1");
    registry.release("img1");
    assert_eq!(registry.ref_count("img1"), Some(0));
    assert!(registry.is_release_pending("img1"));

    assert_eq!(registry.acquire("img1", &blob_a), handle);
    assert_eq!(registry.ref_count("img1"), Some(1));
    assert!(!registry.is_release_pending("img1"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(allocator.resolve(&handle).is_some());
}
