//! Aggregate trait and the versioned aggregate root.
//!
//! An aggregate's state is a pure function of its ordered event history.
//! [`Aggregate::handle`] decides which events a command produces and
//! [`Aggregate::apply`] folds one event into the state. [`AggregateRoot`]
//! pairs the state with its identity and stream position.

use crate::command::Command;
use crate::event::{Event, EventError, RecordedEvent, SerializedEvent};
use crate::stream::{AggregateId, StreamId, Version};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself is the aggregate's state.
///
/// # Contract
///
/// - `handle` is a pure decision function: no I/O, no side effects. It
///   validates a command against the current state and returns zero or more
///   events, or rejects it.
/// - `apply` is a pure, total fold step. Replaying the same events from
///   `Default::default()` always yields an equal state.
pub trait Aggregate: Default + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Type tag of this aggregate (e.g. `"WeatherStation"`).
    const AGGREGATE_TYPE: &'static str;

    /// The commands this aggregate handles.
    type Command: Command;

    /// The events this aggregate produces and applies.
    type Event: Event;

    /// Command rejection error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate a command against the current state and produce events.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` to reject the command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Apply a single event to the state.
    fn apply(&mut self, event: &Self::Event);
}

/// A recorded event could not be folded onto an aggregate root.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FoldError {
    /// The event belongs to a different stream.
    #[error("Event from stream {found} folded onto {expected}")]
    WrongStream {
        /// Stream of the root.
        expected: StreamId,
        /// Stream of the event.
        found: StreamId,
    },

    /// The event is not the next one in sequence.
    #[error("Event out of sequence on {stream_id}: expected version {expected}, found {found}")]
    OutOfSequence {
        /// Stream of the root.
        stream_id: StreamId,
        /// The version the next event must carry.
        expected: Version,
        /// The version the event carries.
        found: Version,
    },
}

/// Aggregate state together with its identity and version.
///
/// The version is the sequence number of the last event folded into the
/// root, or [`Version::INITIAL`] for a root with no history.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRoot<A: Aggregate> {
    stream_id: StreamId,
    version: Version,
    state: A,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// An empty root at version 0.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        Self {
            stream_id: StreamId::new(A::AGGREGATE_TYPE, id),
            version: Version::INITIAL,
            state: A::default(),
        }
    }

    /// Stream of this aggregate.
    #[must_use]
    pub const fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Identity of this aggregate.
    #[must_use]
    pub const fn id(&self) -> &AggregateId {
        self.stream_id.aggregate_id()
    }

    /// Sequence number of the last folded event.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Current domain state.
    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// Consume the root, keeping only the domain state.
    #[must_use]
    pub fn into_state(self) -> A {
        self.state
    }

    /// Fold one recorded event into the root.
    ///
    /// Unknown or undecodable event types are skipped with a warning so that
    /// streams written by newer code still replay; the version still moves to
    /// the event's sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`FoldError`] if the event belongs to another stream or is not
    /// the next one in sequence. The root is left unchanged.
    pub fn apply_recorded(&mut self, recorded: &RecordedEvent) -> Result<(), FoldError> {
        if recorded.stream_id != self.stream_id {
            return Err(FoldError::WrongStream {
                expected: self.stream_id.clone(),
                found: recorded.stream_id.clone(),
            });
        }
        if !recorded.version.follows(self.version) {
            return Err(FoldError::OutOfSequence {
                stream_id: self.stream_id.clone(),
                expected: self.version.next(),
                found: recorded.version,
            });
        }

        match recorded.decode::<A::Event>() {
            Ok(Some(event)) => self.state.apply(&event),
            Ok(None) => tracing::warn!(
                stream = %self.stream_id,
                version = %recorded.version,
                event_type = recorded.event_type(),
                "Skipping unknown event type"
            ),
            Err(error) => tracing::warn!(
                stream = %self.stream_id,
                version = %recorded.version,
                %error,
                "Skipping undecodable event"
            ),
        }
        self.version = recorded.version;
        Ok(())
    }

    /// Turn freshly decided domain events into recorded events that follow
    /// this root's version. The root itself is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if an event cannot be encoded.
    pub fn stamp(
        &self,
        events: &[A::Event],
        recorded_at: DateTime<Utc>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Vec<RecordedEvent>, EventError> {
        let mut version = self.version;
        events
            .iter()
            .map(|event| {
                version = version.next();
                Ok(RecordedEvent::new(
                    self.stream_id.clone(),
                    version,
                    recorded_at,
                    SerializedEvent::from_event(event, metadata.cloned())?,
                ))
            })
            .collect()
    }
}

/// Fold an ordered sequence of recorded events from an empty root.
///
/// # Errors
///
/// Returns [`FoldError`] at the first event that does not belong to `id`'s
/// stream or breaks the sequence.
pub fn fold<'a, A, I>(id: AggregateId, events: I) -> Result<AggregateRoot<A>, FoldError>
where
    A: Aggregate,
    I: IntoIterator<Item = &'a RecordedEvent>,
{
    let mut root = AggregateRoot::new(id);
    for event in events {
        root.apply_recorded(event)?;
    }
    Ok(root)
}
