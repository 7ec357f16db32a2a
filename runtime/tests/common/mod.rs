//! Shared test aggregate and wiring for runtime integration tests.

#![allow(dead_code)] // Each test binary uses a different subset

use foldline_core::aggregate::Aggregate;
use foldline_core::command::Command;
use foldline_core::context::Context;
use foldline_core::event::{Event, RecordedEvent};
use foldline_core::event_bus::{
    DispatchError, EventBus, EventBusError, EventHandler, EventMatcher, SubscriptionId,
};
use foldline_core::event_store::{EventStore, EventStoreError, RecordedEventStream};
use foldline_core::stream::{StreamId, Version};
use foldline_runtime::config::{DispatcherConfig, RuntimeConfig};
use foldline_runtime::dispatcher::EventDispatcher;
use foldline_runtime::retry::RetryPolicy;
use foldline_runtime::AggregateRuntime;
use foldline_testing::{InMemoryEventStore, recorded, test_clock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// A running total that refuses to add zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: u64,
    pub entries: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TallyCommand {
    Add(u64),
    Touch,
}

impl Command for TallyCommand {
    const COMMAND_TYPES: &'static [&'static str] = &["Add", "Touch"];

    fn command_type(&self) -> &'static str {
        match self {
            Self::Add(_) => "Add",
            Self::Touch => "Touch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TallyEvent {
    Added(u64),
}

impl Event for TallyEvent {
    const EVENT_TYPES: &'static [&'static str] = &["Added"];

    fn event_type(&self) -> &'static str {
        "Added"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot add zero")]
pub struct AddZero;

impl Aggregate for Tally {
    const AGGREGATE_TYPE: &'static str = "Tally";
    type Command = TallyCommand;
    type Event = TallyEvent;
    type Error = AddZero;

    fn handle(&self, command: &TallyCommand) -> Result<Vec<TallyEvent>, AddZero> {
        match command {
            TallyCommand::Add(0) => Err(AddZero),
            TallyCommand::Add(n) => Ok(vec![TallyEvent::Added(*n)]),
            TallyCommand::Touch => Ok(Vec::new()),
        }
    }

    fn apply(&mut self, event: &TallyEvent) {
        let TallyEvent::Added(n) = event;
        self.total += n;
        self.entries += 1;
    }
}

pub fn stream(id: &str) -> StreamId {
    StreamId::new(Tally::AGGREGATE_TYPE, id)
}

/// Fast retries so failure paths finish quickly.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig::default().with_store_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
}

pub fn fast_dispatcher() -> EventDispatcher {
    EventDispatcher::new(
        DispatcherConfig::default()
            .with_delivery_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
            .with_handler_timeout(Duration::from_millis(200)),
    )
}

pub fn runtime_with(
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    config: RuntimeConfig,
) -> AggregateRuntime<Tally> {
    AggregateRuntime::new(store, bus, Arc::new(test_clock()), config)
}

pub fn runtime(store: &InMemoryEventStore) -> AggregateRuntime<Tally> {
    runtime_with(
        Arc::new(store.clone()),
        Arc::new(fast_dispatcher()),
        fast_config(),
    )
}

/// Event store that lets another writer win the race for the first
/// `races` appends: a foreign event is appended just before each of them.
pub struct RacingStore {
    pub inner: InMemoryEventStore,
    races: AtomicUsize,
}

impl RacingStore {
    pub fn new(inner: InMemoryEventStore, races: usize) -> Self {
        Self {
            inner,
            races: AtomicUsize::new(races),
        }
    }
}

impl EventStore for RacingStore {
    fn append(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<RecordedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let race = self
                .races
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if race {
                let foreign = recorded(&stream_id, expected_version.next().value(), &TallyEvent::Added(100));
                self.inner
                    .append(stream_id.clone(), expected_version, vec![foreign])
                    .await?;
            }
            self.inner.append(stream_id, expected_version, events).await
        })
    }

    fn load_stream(
        &self,
        stream_id: StreamId,
        after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<RecordedEventStream, EventStoreError>> + Send + '_>> {
        self.inner.load_stream(stream_id, after)
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        self.inner.clear()
    }
}

/// Event bus whose publish always fails.
pub struct BrokenBus;

impl EventBus for BrokenBus {
    fn publish<'a>(
        &'a self,
        _ctx: &'a Context,
        _events: &'a [RecordedEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async { Err(EventBusError::PublishFailed("broker down".to_string())) })
    }

    fn subscribe(
        &self,
        _matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, EventBusError> {
        Err(EventBusError::SubscriptionFailed {
            handler: handler.name().to_string(),
            reason: "broker down".to_string(),
        })
    }

    fn errors(&self) -> broadcast::Receiver<DispatchError> {
        broadcast::channel(1).1
    }
}
