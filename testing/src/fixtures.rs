//! Builders for recorded events.
//!
//! Tests often need events as the event log would hold them without running
//! commands. These helpers stamp domain events with consecutive versions and
//! the [`test_clock`](crate::test_clock) time.

use crate::mocks::test_clock;
use foldline_core::environment::Clock;
use foldline_core::event::{Event, RecordedEvent, SerializedEvent};
use foldline_core::stream::{StreamId, Version};

/// One recorded event at `version` of `stream_id`.
///
/// # Panics
///
/// Panics if the event cannot be serialized.
#[must_use]
#[allow(clippy::expect_used)] // Test helper: a broken fixture should fail loudly
pub fn recorded<E: Event>(stream_id: &StreamId, version: u64, event: &E) -> RecordedEvent {
    RecordedEvent::new(
        stream_id.clone(),
        Version::new(version),
        test_clock().now(),
        SerializedEvent::from_event(event, None).expect("fixture event should serialize"),
    )
}

/// A complete history for `stream_id`: versions `1..=events.len()`.
///
/// # Panics
///
/// Panics if an event cannot be serialized.
#[must_use]
pub fn history<E: Event>(stream_id: &StreamId, events: &[E]) -> Vec<RecordedEvent> {
    (1_u64..)
        .zip(events)
        .map(|(version, event)| recorded(stream_id, version, event))
        .collect()
}

/// A recorded event whose type no current code knows about, as written by a
/// newer producer.
#[must_use]
pub fn unknown_event(stream_id: &StreamId, version: u64, event_type: &str) -> RecordedEvent {
    RecordedEvent::new(
        stream_id.clone(),
        Version::new(version),
        test_clock().now(),
        SerializedEvent::new(event_type.to_string(), vec![0xde, 0xad], None),
    )
}
