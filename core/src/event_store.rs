//! Event log trait and related types.
//!
//! The event log is the single source of truth for aggregate state: a
//! durable, append-only, per-stream ordered store of [`RecordedEvent`]s with
//! optimistic concurrency control on append.
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `foldline-testing`): fast, deterministic testing
//!   and local development
//!
//! # Example
//!
//! ```no_run
//! use foldline_core::event_store::{EventStore, EventStoreError, load_events};
//! use foldline_core::stream::{StreamId, Version};
//!
//! async fn example(store: &dyn EventStore) -> Result<(), EventStoreError> {
//!     let stream_id = StreamId::new("WeatherStation", "station-1");
//!
//!     // Append with optimistic concurrency: the stream must be empty.
//!     let events = vec![/* recorded events numbered 1.. */];
//!     let new_version = store.append(stream_id.clone(), Version::INITIAL, events).await?;
//!
//!     // Read the whole stream back, oldest first.
//!     let history = load_events(store, stream_id, Version::INITIAL).await?;
//!     Ok(())
//! }
//! ```

use crate::event::RecordedEvent;
use crate::stream::{StreamId, Version};
use futures::{Stream, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: expected version doesn't match current version.
    ///
    /// Another writer appended to the stream after the caller loaded it.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream where the conflict occurred.
        stream_id: StreamId,
        /// The version the caller expected the stream to be at.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// The batch is malformed: events for another stream, or sequence numbers
    /// that do not continue from the expected version.
    #[error("Invalid batch for {stream_id}: {reason}")]
    InvalidBatch {
        /// The target stream.
        stream_id: StreamId,
        /// What is wrong with the batch.
        reason: String,
    },

    /// The store cannot be reached. Transient; retry with backoff.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error inside the store.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EventStoreError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Lazy, finite stream of recorded events, oldest first.
///
/// Calling [`EventStore::load_stream`] again restarts the read.
pub type RecordedEventStream =
    Pin<Box<dyn Stream<Item = Result<RecordedEvent, EventStoreError>> + Send>>;

/// Event log abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the runtime shares one store
/// between all command handlers, restores and projection catch-ups.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventStore>`.
pub trait EventStore: Send + Sync {
    /// Append a batch of events to a stream, all or nothing.
    ///
    /// `events` must belong to `stream_id` and carry the versions
    /// `expected_version + 1 ..= expected_version + events.len()`.
    ///
    /// # Returns
    ///
    /// The stream version after the append. An empty batch returns
    /// `expected_version` if it matches.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stream is not at `expected_version`
    /// - `InvalidBatch`: the events do not fit the stream
    /// - `Unavailable`: the store cannot be reached; nothing was appended
    fn append(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<RecordedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;

    /// Open a lazy read of the events of `stream_id` with a version strictly
    /// greater than `after`, oldest first.
    ///
    /// Pass [`Version::INITIAL`] to read the whole stream. A stream that does
    /// not exist reads as empty.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store cannot be reached (either when opening the
    ///   stream or as an item while reading it)
    fn load_stream(
        &self,
        stream_id: StreamId,
        after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<RecordedEventStream, EventStoreError>> + Send + '_>>;

    /// Remove every stream. For tests and resets only.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store cannot be reached
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>>;
}

/// Read the events of a stream after `after` into memory.
///
/// # Errors
///
/// Propagates any error from opening or reading the stream.
pub async fn load_events(
    store: &dyn EventStore,
    stream_id: StreamId,
    after: Version,
) -> Result<Vec<RecordedEvent>, EventStoreError> {
    store.load_stream(stream_id, after).await?.try_collect().await
}

/// Check that a batch continues `expected_version` on `stream_id`.
///
/// Store implementations call this before touching their storage.
///
/// # Errors
///
/// Returns [`EventStoreError::InvalidBatch`] describing the first offending event.
pub fn validate_batch(
    stream_id: &StreamId,
    expected_version: Version,
    events: &[RecordedEvent],
) -> Result<(), EventStoreError> {
    let mut version = expected_version;
    for event in events {
        if &event.stream_id != stream_id {
            return Err(EventStoreError::InvalidBatch {
                stream_id: stream_id.clone(),
                reason: format!("event belongs to {}", event.stream_id),
            });
        }
        if !event.version.follows(version) {
            return Err(EventStoreError::InvalidBatch {
                stream_id: stream_id.clone(),
                reason: format!("expected version {}, found {}", version.next(), event.version),
            });
        }
        version = event.version;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SerializedEvent;
    use chrono::Utc;

    fn event(stream: &StreamId, version: u64) -> RecordedEvent {
        RecordedEvent::new(
            stream.clone(),
            Version::new(version),
            Utc::now(),
            SerializedEvent::new("Noted".to_string(), vec![], None),
        )
    }

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("Order", "o-1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("Order/o-1"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(EventStoreError::Unavailable("down".into()).is_retryable());
        assert!(
            !EventStoreError::ConcurrencyConflict {
                stream_id: StreamId::new("Order", "o-1"),
                expected: Version::new(1),
                actual: Version::new(2),
            }
            .is_retryable()
        );
    }

    #[test]
    fn contiguous_batch_is_valid() {
        let stream = StreamId::new("Order", "o-1");
        let batch = vec![event(&stream, 3), event(&stream, 4)];
        tokio_test::assert_ok!(validate_batch(&stream, Version::new(2), &batch));
    }

    #[test]
    fn batch_with_gap_is_invalid() {
        let stream = StreamId::new("Order", "o-1");
        let batch = vec![event(&stream, 1), event(&stream, 3)];
        tokio_test::assert_err!(validate_batch(&stream, Version::INITIAL, &batch));
    }

    #[test]
    fn batch_for_other_stream_is_invalid() {
        let stream = StreamId::new("Order", "o-1");
        let batch = vec![event(&StreamId::new("Order", "o-2"), 1)];
        assert!(matches!(
            validate_batch(&stream, Version::INITIAL, &batch),
            Err(EventStoreError::InvalidBatch { .. })
        ));
    }
}
