//! Event trait and the serialized/recorded event envelopes.
//!
//! Events are immutable facts. Domain code models them as an enum implementing
//! [`Event`]; storage and transport only ever see [`SerializedEvent`] payloads
//! wrapped in a [`RecordedEvent`], which adds the stream, the sequence number
//! and the wall-clock time of the append.
//!
//! Payloads are serialized with `bincode`.
//!
//! # Example
//!
//! ```
//! use foldline_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum OrderEvent {
//!     OrderPlaced { total: f64 },
//!     OrderShipped { tracking: String },
//! }
//!
//! impl Event for OrderEvent {
//!     const EVENT_TYPES: &'static [&'static str] = &["OrderPlaced", "OrderShipped"];
//!
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             OrderEvent::OrderPlaced { .. } => "OrderPlaced",
//!             OrderEvent::OrderShipped { .. } => "OrderShipped",
//!         }
//!     }
//! }
//! ```

use crate::stream::{AggregateId, AggregateType, StreamId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event {event_type}: {reason}")]
    DeserializationError {
        /// Type tag of the event that could not be decoded.
        event_type: String,
        /// Decoder message.
        reason: String,
    },
}

/// A domain event: an enum of every fact an aggregate can record.
///
/// `EVENT_TYPES` must list every value `event_type()` can return. It lets
/// consumers tell an unknown (newer, or foreign) event type apart from a
/// corrupted payload of a known one.
pub trait Event: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Every type tag this event enum can produce.
    const EVENT_TYPES: &'static [&'static str];

    /// Stable type tag of this event.
    fn event_type(&self) -> &'static str;

    /// Whether `event_type` is one of [`Event::EVENT_TYPES`].
    #[must_use]
    fn is_known(event_type: &str) -> bool {
        Self::EVENT_TYPES.contains(&event_type)
    }

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode a serialized event.
    ///
    /// Returns `Ok(None)` for event types this enum does not know.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the type is known but the
    /// payload does not decode.
    fn decode(serialized: &SerializedEvent) -> Result<Option<Self>, EventError> {
        if !Self::is_known(&serialized.event_type) {
            return Ok(None);
        }
        bincode::deserialize(&serialized.data)
            .map(Some)
            .map_err(|e| EventError::DeserializationError {
                event_type: serialized.event_type.clone(),
                reason: e.to_string(),
            })
    }
}

/// A serialized event: type tag, bincode payload and optional JSON metadata.
///
/// Common metadata fields:
/// - `correlation_id`: links the event to the request that caused it
/// - `actor`: who issued the command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "TemperatureReported").
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Optional metadata.
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Serialize a domain event.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

/// An event as stored in the event log and delivered to subscribers.
///
/// For a given stream, `version` values are `1, 2, 3, ...` without gaps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Stream the event belongs to.
    pub stream_id: StreamId,

    /// Sequence number of the event within its stream.
    pub version: Version,

    /// Wall-clock time the event was produced.
    pub recorded_at: DateTime<Utc>,

    /// Type tag, payload and metadata.
    pub event: SerializedEvent,
}

impl RecordedEvent {
    /// Create a recorded event.
    #[must_use]
    pub const fn new(
        stream_id: StreamId,
        version: Version,
        recorded_at: DateTime<Utc>,
        event: SerializedEvent,
    ) -> Self {
        Self {
            stream_id,
            version,
            recorded_at,
            event,
        }
    }

    /// Type tag of the wrapped event.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }

    /// Aggregate type of the stream.
    #[must_use]
    pub const fn aggregate_type(&self) -> &AggregateType {
        self.stream_id.aggregate_type()
    }

    /// Aggregate instance of the stream.
    #[must_use]
    pub const fn aggregate_id(&self) -> &AggregateId {
        self.stream_id.aggregate_id()
    }

    /// Decode the payload into a domain event enum.
    ///
    /// # Errors
    ///
    /// See [`Event::decode`].
    pub fn decode<E: Event>(&self) -> Result<Option<E>, EventError> {
        E::decode(&self.event)
    }
}

impl fmt::Display for RecordedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} {}",
            self.stream_id, self.version, self.event.event_type
        )
    }
}
