//! In-memory event log.
//!
//! Implements the full [`EventStore`] contract (atomic batch append,
//! optimistic concurrency, lazy restartable reads) without durability.
//! Fault injection makes the next N calls fail with
//! [`EventStoreError::Unavailable`], for exercising retry paths.

use foldline_core::event::RecordedEvent;
use foldline_core::event_store::{EventStore, EventStoreError, RecordedEventStream, validate_batch};
use foldline_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Inner {
    streams: RwLock<HashMap<StreamId, Vec<RecordedEvent>>>,
    injected_failures: AtomicUsize,
    append_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl Inner {
    fn take_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn event_at(&self, stream_id: &StreamId, index: usize) -> Option<RecordedEvent> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_id)
            .and_then(|events| events.get(index))
            .cloned()
    }
}

/// In-memory event log for tests and local development.
///
/// Cheap to clone; clones share the same streams.
///
/// # Example
///
/// ```
/// use foldline_testing::InMemoryEventStore;
/// use foldline_core::event_store::EventStore;
/// use foldline_core::stream::{StreamId, Version};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let stream = StreamId::new("WeatherStation", "station-1");
///
/// // An empty batch at the right version is a no-op.
/// let version = store.append(stream.clone(), Version::INITIAL, vec![]).await?;
/// assert_eq!(version, Version::INITIAL);
///
/// // The next call fails as if the store were down.
/// store.fail_next(1);
/// assert!(store.append(stream, Version::INITIAL, vec![]).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls (append or load) fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.inner.injected_failures.store(count, Ordering::Release);
    }

    /// Injected failures not yet consumed.
    #[must_use]
    pub fn pending_failures(&self) -> usize {
        self.inner.injected_failures.load(Ordering::Acquire)
    }

    /// Every event of `stream_id`, oldest first.
    #[must_use]
    pub fn events(&self, stream_id: &StreamId) -> Vec<RecordedEvent> {
        self.inner
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Current version of `stream_id`.
    #[must_use]
    pub fn version(&self, stream_id: &StreamId) -> Version {
        Version::new(self.events(stream_id).len() as u64)
    }

    /// Number of non-empty streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.inner
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of events across all streams.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.inner
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Number of `append` calls, failed ones included.
    #[must_use]
    pub fn append_calls(&self) -> usize {
        self.inner.append_calls.load(Ordering::Acquire)
    }

    /// Number of `load_stream` calls, failed ones included.
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.inner.load_calls.load(Ordering::Acquire)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<RecordedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.inner.append_calls.fetch_add(1, Ordering::AcqRel);
            if self.inner.take_failure() {
                return Err(EventStoreError::Unavailable("injected failure".to_string()));
            }

            let mut streams = self
                .inner
                .streams
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let actual = Version::new(streams.get(&stream_id).map_or(0, Vec::len) as u64);
            if actual != expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected: expected_version,
                    actual,
                });
            }
            validate_batch(&stream_id, expected_version, &events)?;
            if events.is_empty() {
                return Ok(actual);
            }

            let stream = streams.entry(stream_id).or_default();
            stream.extend(events);
            Ok(Version::new(stream.len() as u64))
        })
    }

    fn load_stream(
        &self,
        stream_id: StreamId,
        after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<RecordedEventStream, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.inner.load_calls.fetch_add(1, Ordering::AcqRel);
            if self.inner.take_failure() {
                return Err(EventStoreError::Unavailable("injected failure".to_string()));
            }

            // Versions are 1-based, so the first event after `after` sits at index `after`.
            let inner = Arc::clone(&self.inner);
            let start = usize::try_from(after.value()).unwrap_or(usize::MAX);
            let stream = async_stream::stream! {
                let mut index = start;
                while let Some(event) = inner.event_at(&stream_id, index) {
                    yield Ok::<_, EventStoreError>(event);
                    index += 1;
                }
            };
            Ok(Box::pin(stream) as RecordedEventStream)
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.inner
                .streams
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            Ok(())
        })
    }
}
