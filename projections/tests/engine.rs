//! Projection engine integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use foldline_core::context::Context;
use foldline_core::event::{Event, RecordedEvent};
use foldline_core::event_bus::EventBus;
use foldline_core::event_store::EventStore;
use foldline_core::projection::{Projector, ProjectorError, ReadModel, ReadModelStore};
use foldline_core::stream::{AggregateId, StreamId, Version};
use foldline_projections::{
    Handled, ProjectOutcome, ProjectionEngine, ProjectionError, ProjectionHandler, Visibility,
    VisibilityConfig,
};
use foldline_runtime::config::DispatcherConfig;
use foldline_runtime::dispatcher::EventDispatcher;
use foldline_runtime::retry::RetryPolicy;
use foldline_testing::fixtures::unknown_event;
use foldline_testing::{InMemoryEventStore, InMemoryReadModelStore, history, recorded};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum GaugeEvent {
    Labelled(String),
    Read(i64),
}

impl Event for GaugeEvent {
    const EVENT_TYPES: &'static [&'static str] = &["Labelled", "Read"];

    fn event_type(&self) -> &'static str {
        match self {
            Self::Labelled(_) => "Labelled",
            Self::Read(_) => "Read",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GaugeView {
    id: AggregateId,
    version: Version,
    label: String,
    readings: Vec<i64>,
}

impl ReadModel for GaugeView {
    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

struct GaugeProjector;

impl Projector for GaugeProjector {
    const PROJECTOR_TYPE: &'static str = "GaugeProjector";
    const AGGREGATE_TYPE: &'static str = "Gauge";
    type Event = GaugeEvent;
    type Entity = GaugeView;

    fn new_entity(&self, id: &AggregateId) -> GaugeView {
        GaugeView {
            id: id.clone(),
            version: Version::INITIAL,
            label: String::new(),
            readings: Vec::new(),
        }
    }

    fn project(
        &self,
        event: &GaugeEvent,
        _recorded: &RecordedEvent,
        mut entity: GaugeView,
    ) -> Result<GaugeView, ProjectorError> {
        match event {
            GaugeEvent::Labelled(label) => {
                entity.label.clone_from(label);
                entity.readings.clear();
            }
            GaugeEvent::Read(value) => entity.readings.push(*value),
        }
        Ok(entity)
    }
}

struct Fixture {
    log: InMemoryEventStore,
    models: InMemoryReadModelStore<GaugeView>,
    engine: Arc<ProjectionEngine<GaugeProjector>>,
}

impl Fixture {
    fn new() -> Self {
        let log = InMemoryEventStore::new();
        let models = InMemoryReadModelStore::new();
        let engine = ProjectionEngine::new(GaugeProjector, Arc::new(models.clone()), Arc::new(log.clone()))
            .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)));
        Self {
            log,
            models,
            engine: Arc::new(engine),
        }
    }

    /// Append readings `1..=count` to the log and return them.
    async fn seed(&self, id: &str, count: i64) -> Vec<RecordedEvent> {
        let events = readings(id, count);
        self.log
            .append(stream(id), Version::INITIAL, events.clone())
            .await
            .unwrap();
        events
    }

    fn view(&self, id: &str) -> GaugeView {
        self.models.get(&AggregateId::new(id)).unwrap()
    }
}

fn stream(id: &str) -> StreamId {
    StreamId::new("Gauge", id)
}

fn readings(id: &str, count: i64) -> Vec<RecordedEvent> {
    let events: Vec<_> = (1..=count).map(GaugeEvent::Read).collect();
    history(&stream(id), &events)
}

fn fast_visibility() -> VisibilityConfig {
    VisibilityConfig::new(RetryPolicy::fixed(4, Duration::from_millis(5)))
}

#[tokio::test]
async fn in_order_events_are_applied() {
    let fx = Fixture::new();
    let ctx = Context::new();

    for event in readings("g-1", 3) {
        let handled = fx.engine.handle(&ctx, &event).await.unwrap();
        assert_eq!(
            handled,
            Handled::Applied {
                version: event.version,
                replayed: 0,
            }
        );
    }

    let view = fx.view("g-1");
    assert_eq!(view.version, Version::new(3));
    assert_eq!(view.readings, vec![1, 2, 3]);
}

#[tokio::test]
async fn redelivery_is_a_silent_no_op() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let events = readings("g-1", 2);
    for event in &events {
        fx.engine.handle(&ctx, event).await.unwrap();
    }
    let writes = fx.models.writes();
    let before = fx.view("g-1");

    assert_eq!(fx.engine.handle(&ctx, &events[0]).await.unwrap(), Handled::Duplicate);
    assert_eq!(fx.engine.handle(&ctx, &events[1]).await.unwrap(), Handled::Duplicate);

    assert_eq!(fx.models.writes(), writes);
    assert_eq!(fx.view("g-1"), before);
}

#[tokio::test]
async fn gap_is_filled_from_the_log() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let events = fx.seed("g-1", 4).await;

    fx.engine.handle(&ctx, &events[0]).await.unwrap();
    let handled = fx.engine.handle(&ctx, &events[3]).await.unwrap();

    assert_eq!(
        handled,
        Handled::Applied {
            version: Version::new(4),
            replayed: 2,
        }
    );
    assert_eq!(fx.view("g-1").readings, vec![1, 2, 3, 4]);

    // The events that were skipped over arrive late and are dropped.
    assert_eq!(fx.engine.handle(&ctx, &events[1]).await.unwrap(), Handled::Duplicate);
    assert_eq!(fx.view("g-1").readings, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn first_delivery_past_version_one_replays_from_scratch() {
    let fx = Fixture::new();
    let events = fx.seed("g-1", 3).await;

    let handled = fx.engine.handle(&Context::new(), &events[2]).await.unwrap();

    assert_eq!(
        handled,
        Handled::Applied {
            version: Version::new(3),
            replayed: 2,
        }
    );
    assert_eq!(fx.view("g-1").readings, vec![1, 2, 3]);
}

#[tokio::test]
async fn gap_the_log_cannot_close_is_retryable_and_keeps_progress() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let all = readings("g-1", 4);
    fx.log
        .append(stream("g-1"), Version::INITIAL, all[..2].to_vec())
        .await
        .unwrap();

    fx.engine.handle(&ctx, &all[0]).await.unwrap();
    let err = fx.engine.handle(&ctx, &all[3]).await.unwrap_err();

    assert_eq!(
        err,
        ProjectionError::SequenceGap {
            stream_id: stream("g-1"),
            expected: Version::new(3),
            available: Version::new(2),
            found: Version::new(4),
        }
    );
    assert!(err.is_retryable());
    assert_eq!(fx.view("g-1").version, Version::new(2));

    fx.log
        .append(stream("g-1"), Version::new(2), all[2..].to_vec())
        .await
        .unwrap();
    let handled = fx.engine.handle(&ctx, &all[3]).await.unwrap();
    assert_eq!(
        handled,
        Handled::Applied {
            version: Version::new(4),
            replayed: 1,
        }
    );
    assert_eq!(fx.view("g-1").readings, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn foreign_streams_are_ignored() {
    let fx = Fixture::new();
    let event = recorded(&StreamId::new("Ledger", "g-1"), 1, &GaugeEvent::Read(1));

    let handled = fx.engine.handle(&Context::new(), &event).await.unwrap();

    assert_eq!(handled, Handled::Ignored);
    assert!(fx.models.is_empty());
}

#[tokio::test]
async fn unknown_event_types_keep_the_version_in_step() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let mut events = readings("g-1", 1);
    events.push(unknown_event(&stream("g-1"), 2, "Recalibrated"));
    events.push(recorded(&stream("g-1"), 3, &GaugeEvent::Read(3)));

    for event in &events {
        fx.engine.handle(&ctx, event).await.unwrap();
    }

    let view = fx.view("g-1");
    assert_eq!(view.version, Version::new(3));
    assert_eq!(view.readings, vec![1, 3]);
}

#[tokio::test]
async fn undecodable_event_does_not_stall_the_read_model() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let mut events = readings("g-1", 1);
    // A known type whose payload does not decode.
    events.push(unknown_event(&stream("g-1"), 2, "Read"));
    events.push(recorded(&stream("g-1"), 3, &GaugeEvent::Read(3)));
    fx.log
        .append(stream("g-1"), Version::INITIAL, events.clone())
        .await
        .unwrap();

    fx.engine.handle(&ctx, &events[0]).await.unwrap();
    let handled = fx.engine.handle(&ctx, &events[2]).await.unwrap();

    assert_eq!(
        handled,
        Handled::Applied {
            version: Version::new(3),
            replayed: 1,
        }
    );
    let view = fx.view("g-1");
    assert_eq!(view.version, Version::new(3));
    assert_eq!(view.readings, vec![1, 3]);

    let live = recorded(&stream("g-1"), 4, &GaugeEvent::Read(4));
    fx.engine.handle(&ctx, &live).await.unwrap();
    assert_eq!(fx.view("g-1").readings, vec![1, 3, 4]);
}

#[tokio::test]
async fn late_projection_catches_up_then_follows_live_events() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let id = AggregateId::new("g-1");
    fx.seed("g-1", 3).await;

    let caught_up = fx.engine.catch_up(&ctx, &id).await.unwrap().unwrap();
    assert_eq!(caught_up.version, Version::new(3));

    let live = recorded(&stream("g-1"), 4, &GaugeEvent::Read(4));
    fx.log
        .append(stream("g-1"), Version::new(3), vec![live.clone()])
        .await
        .unwrap();
    fx.engine.handle(&ctx, &live).await.unwrap();

    let view = fx.view("g-1");
    assert_eq!(view.version, Version::new(4));
    assert_eq!(view.readings, vec![1, 2, 3, 4]);

    // Catching up again has nothing to add and writes nothing.
    let writes = fx.models.writes();
    assert_eq!(fx.engine.catch_up(&ctx, &id).await.unwrap(), Some(view));
    assert_eq!(fx.models.writes(), writes);
}

#[tokio::test]
async fn catch_up_of_unknown_identity_is_none() {
    let fx = Fixture::new();

    let caught_up = fx.engine.catch_up(&Context::new(), &AggregateId::new("ghost")).await.unwrap();

    assert!(caught_up.is_none());
    assert!(fx.models.is_empty());
}

#[tokio::test]
async fn rebuild_replaces_a_damaged_entity() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let id = AggregateId::new("g-1");
    fx.seed("g-1", 3).await;
    fx.models.insert(GaugeView {
        id: id.clone(),
        version: Version::new(3),
        label: "wrong".to_string(),
        readings: vec![9, 9, 9],
    });

    let rebuilt = fx.engine.rebuild(&ctx, &id).await.unwrap().unwrap();

    assert_eq!(rebuilt.readings, vec![1, 2, 3]);
    assert!(rebuilt.label.is_empty());
    assert_eq!(fx.view("g-1"), rebuilt);
}

#[tokio::test]
async fn rebuild_without_history_removes_the_entity() {
    let fx = Fixture::new();
    let id = AggregateId::new("g-1");
    fx.models.insert(GaugeProjector.new_entity(&id));

    assert!(fx.engine.rebuild(&Context::new(), &id).await.unwrap().is_none());
    assert!(fx.models.get(&id).is_none());
}

#[tokio::test]
async fn unavailable_read_model_store_is_retried() {
    let fx = Fixture::new();
    fx.models.fail_next(3);

    let events = readings("g-1", 1);
    let handled = fx.engine.handle(&Context::new(), &events[0]).await.unwrap();

    assert!(matches!(handled, Handled::Applied { .. }));
    assert_eq!(fx.view("g-1").readings, vec![1]);
}

#[tokio::test]
async fn unavailable_read_model_store_escalates_after_retries() {
    let fx = Fixture::new();
    fx.models.fail_next(4);

    let events = readings("g-1", 1);
    let err = fx.engine.handle(&Context::new(), &events[0]).await.unwrap_err();

    assert!(matches!(err, ProjectionError::ReadModel(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn concurrent_out_of_order_deliveries_converge() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let mut events = fx.seed("g-1", 10).await;
    events.reverse();

    let results = futures::future::join_all(events.iter().map(|e| fx.engine.handle(&ctx, e))).await;

    assert!(results.iter().all(Result::is_ok));
    let view = fx.view("g-1");
    assert_eq!(view.version, Version::new(10));
    assert_eq!(view.readings, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn dispatcher_drives_the_projection() {
    let fx = Fixture::new();
    let bus = EventDispatcher::new(
        DispatcherConfig::default().with_delivery_retry(RetryPolicy::fixed(50, Duration::from_millis(10))),
    );
    ProjectionHandler::subscribe(Arc::clone(&fx.engine), &bus).unwrap();
    let ctx = Context::new();

    // Event 3 is published before the log can serve 1 and 2: the gap is
    // reported as transient and redelivered until the log catches up.
    let all = readings("g-1", 3);
    bus.publish(&ctx, &all[2..]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    fx.log
        .append(stream("g-1"), Version::INITIAL, all.clone())
        .await
        .unwrap();

    let reads = fx.engine.read_side(VisibilityConfig::new(RetryPolicy::fixed(100, Duration::from_millis(10))));
    let visible = reads
        .await_entity(&ctx, &AggregateId::new("g-1"), Version::new(3))
        .await
        .unwrap()
        .into_entity()
        .unwrap();
    assert_eq!(visible.readings, vec![1, 2, 3]);
    bus.shutdown().await;
}

#[tokio::test]
async fn read_side_distinguishes_lagging_from_absent() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let reads = fx.engine.read_side(fast_visibility());
    let id = AggregateId::new("g-1");

    assert_eq!(reads.await_entity(&ctx, &id, Version::INITIAL).await.unwrap(), Visibility::Absent);

    let events = fx.seed("g-1", 2).await;
    assert_eq!(
        reads.await_entity(&ctx, &id, Version::INITIAL).await.unwrap(),
        Visibility::NotYetVisible { observed: None }
    );

    fx.engine.handle(&ctx, &events[0]).await.unwrap();
    assert_eq!(
        reads.await_entity(&ctx, &id, Version::new(2)).await.unwrap(),
        Visibility::NotYetVisible {
            observed: Some(Version::new(1)),
        }
    );

    fx.engine.handle(&ctx, &events[1]).await.unwrap();
    let visible = reads.await_entity(&ctx, &id, Version::new(2)).await.unwrap();
    assert_eq!(visible, Visibility::Visible(fx.view("g-1")));
}

#[tokio::test]
async fn read_side_rides_out_a_brief_store_outage() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let events = fx.seed("g-1", 1).await;
    fx.engine.handle(&ctx, &events[0]).await.unwrap();
    fx.models.fail_next(2);

    let visibility = fx
        .engine
        .read_side(fast_visibility())
        .await_entity(&ctx, &AggregateId::new("g-1"), Version::new(1))
        .await
        .unwrap();

    assert!(visibility.is_visible());
}

#[tokio::test]
async fn await_all_returns_what_it_saw() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let reads = fx.engine.read_side(fast_visibility());
    for id in ["g-1", "g-2"] {
        fx.engine.handle(&ctx, &readings(id, 1)[0]).await.unwrap();
    }

    assert_eq!(reads.await_all(&ctx, 2).await.unwrap().len(), 2);
    let partial = reads.await_all(&ctx, 3).await.unwrap();
    assert_eq!(partial.len(), 2);
    assert_eq!(partial[0].id, AggregateId::new("g-1"));
}

#[tokio::test]
async fn waiting_honours_cancellation() {
    let fx = Fixture::new();
    let ctx = Context::new();
    ctx.cancellation().cancel();

    let err = fx
        .engine
        .read_side(VisibilityConfig::default())
        .await_entity(&ctx, &AggregateId::new("g-1"), Version::new(1))
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectionError::Interrupted(_)));
}

#[tokio::test]
async fn cleared_store_is_rebuilt_by_catch_up() {
    let fx = Fixture::new();
    let ctx = Context::new();
    let id = AggregateId::new("g-1");
    fx.seed("g-1", 2).await;
    fx.engine.catch_up(&ctx, &id).await.unwrap();

    fx.models.clear().await.unwrap();
    let restored = fx.engine.catch_up(&ctx, &id).await.unwrap().unwrap();

    assert_eq!(restored.readings, vec![1, 2]);
}

/// Fold `events` strictly in order.
fn in_order(events: &[RecordedEvent]) -> Option<GaugeView> {
    let engine = ProjectionEngine::new(
        GaugeProjector,
        Arc::new(InMemoryReadModelStore::new()),
        Arc::new(InMemoryEventStore::new()),
    );
    let ctx = Context::new();
    let mut entity = None;
    for event in events {
        match engine.project(&ctx, event, entity.clone()).unwrap() {
            ProjectOutcome::Applied(next) => entity = Some(next),
            other => panic!("in-order fold produced {other:?}"),
        }
    }
    entity
}

fn gauge_events() -> impl Strategy<Value = Vec<GaugeEvent>> {
    prop::collection::vec(
        prop_oneof![
            "[a-z]{1,6}".prop_map(GaugeEvent::Labelled),
            (-50_i64..50).prop_map(GaugeEvent::Read),
        ],
        1..25,
    )
}

proptest! {
    #[test]
    fn redelivery_never_changes_the_entity(events in gauge_events(), redeliver in prop::collection::vec(any::<prop::sample::Index>(), 1..10)) {
        let recorded = history(&stream("p"), &events);
        let engine = ProjectionEngine::new(
            GaugeProjector,
            Arc::new(InMemoryReadModelStore::new()),
            Arc::new(InMemoryEventStore::new()),
        );
        let ctx = Context::new();
        let folded = in_order(&recorded);

        for index in redeliver {
            let event = index.get(&recorded);
            let outcome = engine.project(&ctx, event, folded.clone()).unwrap();
            prop_assert_eq!(outcome, ProjectOutcome::Duplicate);
        }
    }

    #[test]
    fn pure_gate_only_ever_yields_an_in_order_prefix(
        events in gauge_events(),
        order in prop::collection::vec(any::<prop::sample::Index>(), 1..60),
    ) {
        let recorded = history(&stream("p"), &events);
        let engine = ProjectionEngine::new(
            GaugeProjector,
            Arc::new(InMemoryReadModelStore::new()),
            Arc::new(InMemoryEventStore::new()),
        );
        let ctx = Context::new();
        let mut entity: Option<GaugeView> = None;
        let mut version = Version::INITIAL;

        for index in order {
            let event = index.get(&recorded);
            if let ProjectOutcome::Applied(next) = engine.project(&ctx, event, entity.clone()).unwrap() {
                entity = Some(next);
            }
            let now = entity.as_ref().map_or(Version::INITIAL, |e| e.version);
            prop_assert!(now >= version);
            version = now;
        }

        let applied = usize::try_from(version.value()).unwrap();
        prop_assert_eq!(entity, in_order(&recorded[..applied]));
    }

    #[test]
    fn any_delivery_order_converges_to_the_in_order_fold(
        events in gauge_events(),
        order in prop::collection::vec(any::<prop::sample::Index>(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let fx = Fixture::new();
        let recorded = history(&stream("p"), &events);
        let last = recorded.last().unwrap().clone();

        let converged = runtime.block_on(async {
            fx.log
                .append(stream("p"), Version::INITIAL, recorded.clone())
                .await
                .unwrap();
            let ctx = Context::new();
            for index in &order {
                fx.engine.handle(&ctx, index.get(&recorded)).await.unwrap();
            }
            // The final delivery guarantees the whole stream was offered.
            fx.engine.handle(&ctx, &last).await.unwrap();
            fx.models.get(&AggregateId::new("p"))
        });

        prop_assert_eq!(converged, in_order(&recorded));
    }
}
