//! Property-Based Tests
//!
//! Uses proptest to check the invariants the four components promise across
//! arbitrary inputs.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::{AnnounceDecision, BroadcastWatermarks};
use crate::cache::{CacheEntry, MemoryQueryCache, QueryCache, QueryStatus, StaleTime};
use crate::cache_key;
use crate::freshness::is_fresh_at;
use crate::media::{BinaryPayload, HandleRegistry, LocalHandleAllocator};
use crate::persist::sanitize;
use crate::value::{structural_eq, PendingOp, Value};

// == Strategies ==
/// Scalars, callables and unsettled pending operations.
fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i32..1000).prop_map(|n| Value::Number(n as f64)),
        "[a-z]{0,8}".prop_map(Value::String),
        Just(()).prop_map(|_| Value::function("cb", |_| Value::Null)),
        Just(()).prop_map(|_| Value::Pending(PendingOp::new())),
    ]
}

/// Nested value trees of every container kind.
fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(4, 48, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::array),
            prop::collection::vec(("[a-c]{1,2}", inner.clone()), 0..4).prop_map(Value::object),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::set),
            prop::collection::vec((inner.clone(), inner), 0..3).prop_map(Value::map),
        ]
    })
}

#[derive(Debug, Clone, Copy)]
enum HandleOp {
    Acquire,
    Release,
}

fn handle_op_strategy() -> impl Strategy<Value = HandleOp> {
    prop_oneof![Just(HandleOp::Acquire), Just(HandleOp::Release)]
}

fn success_entry(data_updated_at: u64) -> CacheEntry {
    let mut entry = CacheEntry::new(cache_key!["k"], 0);
    entry.status = QueryStatus::Success;
    entry.data = Some(Value::Null);
    entry.data_updated_at = data_updated_at;
    entry
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // *For any* positive window, an entry fresh at `t` is stale from
    // `t + window` on, and fresh exactly while its age is below the window.
    #[test]
    fn prop_freshness_monotonicity(
        updated_at in 0u64..1_000_000,
        window in 1i64..100_000,
        elapsed in 0u64..200_000,
        extra in 0u64..100_000,
    ) {
        let entry = success_entry(updated_at);
        let stale_time = StaleTime::Millis(window);
        let t = updated_at + elapsed;

        let fresh = is_fresh_at(Some(&entry), stale_time, t);
        prop_assert_eq!(fresh, elapsed < window as u64);
        if fresh {
            let later = t + window as u64 + extra;
            prop_assert!(!is_fresh_at(Some(&entry), stale_time, later));
        }
    }

    // *For any* sequence of writes, dataUpdatedAt never moves backwards.
    #[test]
    fn prop_data_updated_at_monotonic(stamps in prop::collection::vec(0u64..10_000, 1..30)) {
        let cache = MemoryQueryCache::new(StaleTime::Millis(60_000), 300_000);
        let key = cache_key!["groups"];
        let mut previous = 0;
        for stamp in stamps {
            cache.set_data(key.clone(), Value::Null, stamp);
            let current = cache.get_entry(&key).map(|e| e.data_updated_at).unwrap_or(0);
            prop_assert!(current >= previous);
            prop_assert!(current >= stamp);
            previous = current;
        }
    }

    // *For any* value, sanitizing leaves nothing unserializable behind.
    #[test]
    fn prop_sanitize_omission(value in value_strategy()) {
        if let Some(out) = sanitize(&value) {
            prop_assert!(!out.contains_unserializable());
            prop_assert!(out.to_json().is_ok());
        }
    }

    // *For any* value, sanitizing twice equals sanitizing once.
    #[test]
    fn prop_sanitize_idempotent(value in value_strategy()) {
        if let Some(once) = sanitize(&value) {
            let twice = sanitize(&once);
            prop_assert!(twice.is_some());
            prop_assert!(structural_eq(&once, &twice.unwrap_or(Value::Null)));
        }
    }

    // *For any* clean container, sanitize hands back the same reference.
    #[test]
    fn prop_sanitize_clean_is_untouched(value in value_strategy()) {
        if value.identity().is_some() && !value.contains_unserializable() {
            let out = sanitize(&value);
            prop_assert!(out.is_some_and(|out| out.same_ref(&value)));
        }
    }

    // *For any* value hung off a self-referencing node, sanitize terminates
    // and the output refers back to the single sanitized node.
    #[test]
    fn prop_sanitize_cycle_safety(value in value_strategy()) {
        let root = Value::object([("payload", value)]);
        root.insert("self", root.clone());

        let out = sanitize(&root);
        prop_assert!(out.is_some());
        let out = out.unwrap_or(Value::Null);
        let back = out.get("self");
        prop_assert!(back.is_some_and(|back| back.same_ref(&out)));
    }

    // *For any* container seen twice in one pass, both slots share one result.
    #[test]
    fn prop_sanitize_aliasing(value in value_strategy()) {
        if value.identity().is_some() {
            let out = sanitize(&Value::array([value.clone(), value]));
            let items = out.and_then(|out| out.items()).unwrap_or_default();
            prop_assert_eq!(items.len(), 2);
            prop_assert!(items[0].same_ref(&items[1]));
        }
    }

    // *For any* acquire/release sequence on one key, the count follows a
    // floored counter and never goes negative.
    #[test]
    fn prop_refcount_non_negative(ops in prop::collection::vec(handle_op_strategy(), 1..60)) {
        // No runtime here, so a release to zero is immediate.
        let registry = HandleRegistry::new(Arc::new(LocalHandleAllocator::new()), Duration::from_millis(10));
        let payload = BinaryPayload::new(vec![1u8], "image/png");
        let mut expected: usize = 0;

        for op in ops {
            match op {
                HandleOp::Acquire => {
                    registry.acquire("img", &payload);
                    expected += 1;
                }
                HandleOp::Release => {
                    registry.release("img");
                    expected = expected.saturating_sub(1);
                }
            }
            prop_assert_eq!(registry.ref_count("img").unwrap_or(0), expected);
        }
    }

    // *For any* sequence of refresh timestamps, only strictly newer ones are
    // announced, so a repeated timestamp never goes out twice.
    #[test]
    fn prop_broadcast_dedup(stamps in prop::collection::vec(0u64..50, 1..40)) {
        let marks = BroadcastWatermarks::new();
        let mut high = 0;
        for stamp in stamps {
            let decision = marks.on_local_refresh("groups", stamp);
            if stamp > high {
                prop_assert_eq!(decision, AnnounceDecision::Announce);
                high = stamp;
            } else {
                prop_assert_eq!(decision, AnnounceDecision::Duplicate);
            }
            prop_assert_eq!(marks.last_announced("groups"), Some(high));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    // *For any* number of holders, re-acquiring inside the idle window after
    // the count hit zero keeps the handle alive.
    #[test]
    fn prop_deferred_release_correctness(holders in 1usize..5) {
        let registry = HandleRegistry::new(Arc::new(LocalHandleAllocator::new()), Duration::from_millis(40));
        let payload = BinaryPayload::new(vec![7u8], "image/png");

        let (first, again, survived) = tokio_test::block_on(async {
            let first = registry.acquire("img", &payload);
            for _ in 1..holders {
                registry.acquire("img", &payload);
            }
            for _ in 0..holders {
                registry.release("img");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            let again = registry.acquire("img", &payload);
            tokio::time::sleep(Duration::from_millis(100)).await;
            (first, again, registry.handle("img"))
        });

        prop_assert_eq!(&again, &first);
        prop_assert_eq!(survived, Some(first));
        prop_assert_eq!(registry.stats().deallocations, 0);
    }
}
