//! Restore coordinator and cache integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::{Tally, TallyEvent, stream};
use foldline_core::aggregate::{AggregateRoot, fold};
use foldline_core::context::{Context, Interrupted};
use foldline_core::event_store::EventStore;
use foldline_core::stream::{AggregateId, Version};
use foldline_runtime::error::RestoreError;
use foldline_runtime::retry::RetryPolicy;
use foldline_runtime::{RestoreCache, RestoreCoordinator};
use foldline_testing::fixtures::unknown_event;
use foldline_testing::{InMemoryEventStore, history};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn coordinator(store: &InMemoryEventStore) -> RestoreCoordinator<Tally> {
    RestoreCoordinator::new(Arc::new(store.clone()))
        .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(1)))
}

async fn seed(store: &InMemoryEventStore, id: &str, amounts: &[u64]) {
    let events: Vec<_> = amounts.iter().map(|n| TallyEvent::Added(*n)).collect();
    store
        .append(stream(id), Version::INITIAL, history(&stream(id), &events))
        .await
        .unwrap();
}

#[tokio::test]
async fn missing_aggregate_is_not_found() {
    let store = InMemoryEventStore::new();

    let err = coordinator(&store)
        .restore(&Context::new(), &AggregateId::new("ghost"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn restore_replays_full_history() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1, 2, 3]).await;

    let root = coordinator(&store)
        .restore(&Context::new(), &AggregateId::new("t-1"))
        .await
        .unwrap();

    assert_eq!(root.version(), Version::new(3));
    assert_eq!(root.state(), &Tally { total: 6, entries: 3 });
}

#[tokio::test]
async fn restore_skips_unknown_event_types_but_counts_them() {
    let store = InMemoryEventStore::new();
    let mut events = history(&stream("t-1"), &[TallyEvent::Added(4)]);
    events.push(unknown_event(&stream("t-1"), 2, "Multiplied"));
    store
        .append(stream("t-1"), Version::INITIAL, events)
        .await
        .unwrap();

    let root = coordinator(&store)
        .restore(&Context::new(), &AggregateId::new("t-1"))
        .await
        .unwrap();

    assert_eq!(root.version(), Version::new(2));
    assert_eq!(root.state().total, 4);
}

#[tokio::test]
async fn restore_skips_undecodable_events_but_counts_them() {
    let store = InMemoryEventStore::new();
    let mut events = history(&stream("t-1"), &[TallyEvent::Added(4)]);
    // A known type whose payload does not decode.
    events.push(unknown_event(&stream("t-1"), 2, "Added"));
    events.push(foldline_testing::recorded(&stream("t-1"), 3, &TallyEvent::Added(5)));
    store
        .append(stream("t-1"), Version::INITIAL, events)
        .await
        .unwrap();

    let root = coordinator(&store)
        .restore(&Context::new(), &AggregateId::new("t-1"))
        .await
        .unwrap();

    assert_eq!(root.version(), Version::new(3));
    assert_eq!(root.state(), &Tally { total: 9, entries: 2 });
}

#[tokio::test]
async fn restore_retries_unavailable_store() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1]).await;
    store.fail_next(2);

    let root = coordinator(&store)
        .restore(&Context::new(), &AggregateId::new("t-1"))
        .await
        .unwrap();

    assert_eq!(root.version(), Version::new(1));
}

#[tokio::test]
async fn restore_escalates_after_retries() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1]).await;
    store.fail_next(3);

    let err = coordinator(&store)
        .restore(&Context::new(), &AggregateId::new("t-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, RestoreError::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn restore_honours_expired_deadline() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1]).await;
    let ctx = Context::new().with_deadline(tokio::time::Instant::now());

    let err = coordinator(&store)
        .restore(&ctx, &AggregateId::new("t-1"))
        .await
        .unwrap_err();

    assert_eq!(err, RestoreError::Interrupted(Interrupted::DeadlineExceeded));
}

#[tokio::test]
async fn replay_folds_only_newer_events() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1, 2]).await;
    let coordinator = coordinator(&store);
    let ctx = Context::new();
    let id = AggregateId::new("t-1");
    let old = coordinator.restore(&ctx, &id).await.unwrap();

    let more = history(&stream("t-1"), &[TallyEvent::Added(1), TallyEvent::Added(2), TallyEvent::Added(10)]);
    store
        .append(stream("t-1"), Version::new(2), vec![more[2].clone()])
        .await
        .unwrap();

    let replayed = coordinator.replay(&ctx, old).await.unwrap();
    let restored = coordinator.restore(&ctx, &id).await.unwrap();
    assert_eq!(replayed, restored);
    assert_eq!(replayed.state().total, 13);
}

#[tokio::test]
async fn concurrent_restores_agree() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[5, 6, 7]).await;
    let coordinator = coordinator(&store);
    let id = AggregateId::new("t-1");
    let ctx = Context::new();

    let (a, b) = tokio::join!(coordinator.restore(&ctx, &id), coordinator.restore(&ctx, &id));
    assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn cache_refreshes_stale_roots() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1]).await;
    let cache = RestoreCache::new(coordinator(&store));
    let ctx = Context::new();
    let id = AggregateId::new("t-1");

    let first = cache.restore(&ctx, &id).await.unwrap();
    assert_eq!(cache.cached(&id), Some(first));

    let more = history(&stream("t-1"), &[TallyEvent::Added(1), TallyEvent::Added(9)]);
    store
        .append(stream("t-1"), Version::new(1), vec![more[1].clone()])
        .await
        .unwrap();
    let loads_before = store.load_calls();

    let second = cache.restore(&ctx, &id).await.unwrap();
    assert_eq!(second.version(), Version::new(2));
    assert_eq!(second.state().total, 10);
    assert_eq!(store.load_calls(), loads_before + 1);

    cache.invalidate(&id);
    assert!(cache.cached(&id).is_none());
}

#[tokio::test]
async fn cache_keeps_newer_root_on_stale_put() {
    let store = InMemoryEventStore::new();
    seed(&store, "t-1", &[1, 2]).await;
    let cache = RestoreCache::new(coordinator(&store));
    let id = AggregateId::new("t-1");

    let current = cache.restore(&Context::new(), &id).await.unwrap();
    cache.put(AggregateRoot::new(id.clone()));

    assert_eq!(cache.cached(&id), Some(current));
    cache.clear();
    assert!(cache.cached(&id).is_none());
}

proptest! {
    #[test]
    fn fold_is_deterministic(amounts in prop::collection::vec(1_u64..1000, 0..50)) {
        let events: Vec<_> = amounts.iter().map(|n| TallyEvent::Added(*n)).collect();
        let recorded = history(&stream("p"), &events);

        let first: AggregateRoot<Tally> = fold(AggregateId::new("p"), &recorded).unwrap();
        let second: AggregateRoot<Tally> = fold(AggregateId::new("p"), &recorded).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.version().value(), amounts.len() as u64);
        prop_assert_eq!(first.state().total, amounts.iter().sum::<u64>());
    }

    #[test]
    fn fold_in_two_steps_matches_single_fold(
        amounts in prop::collection::vec(1_u64..1000, 1..30),
        split in 0_usize..30,
    ) {
        let events: Vec<_> = amounts.iter().map(|n| TallyEvent::Added(*n)).collect();
        let recorded = history(&stream("p"), &events);
        let split = split.min(recorded.len());

        let mut stepwise: AggregateRoot<Tally> = fold(AggregateId::new("p"), &recorded[..split]).unwrap();
        for event in &recorded[split..] {
            stepwise.apply_recorded(event).unwrap();
        }
        let whole: AggregateRoot<Tally> = fold(AggregateId::new("p"), &recorded).unwrap();

        prop_assert_eq!(stepwise, whole);
    }
}
