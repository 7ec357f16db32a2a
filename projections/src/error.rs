//! Projection engine errors.

use foldline_core::context::Interrupted;
use foldline_core::event_store::EventStoreError;
use foldline_core::projection::{ProjectorError, ReadModelError};
use foldline_core::stream::{StreamId, Version};
use thiserror::Error;

/// Errors that can occur while projecting events into read models.
///
/// Duplicate and stale deliveries are not errors: the engine drops them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// The event log does not yet contain the events needed to close a gap.
    ///
    /// Retryable: the missing range becomes readable once the writer's
    /// append is visible.
    #[error("Sequence gap on {stream_id}: read model expects version {expected}, event log only reaches {available}, event is {found}")]
    SequenceGap {
        /// Stream of the event.
        stream_id: StreamId,
        /// The version the next event must carry.
        expected: Version,
        /// The highest version the log could supply.
        available: Version,
        /// The version of the delivered event.
        found: Version,
    },

    /// The read-model store failed.
    #[error(transparent)]
    ReadModel(#[from] ReadModelError),

    /// The event log is unavailable after retries.
    #[error("Event log unavailable: {0}")]
    StoreUnavailable(String),

    /// The event log rejected the read.
    #[error("Event log error: {0}")]
    Store(EventStoreError),

    /// The projector refused an event.
    #[error(transparent)]
    Projector(#[from] ProjectorError),

    /// The context was cancelled or expired.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ProjectionError {
    /// Whether redelivering the same event later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::SequenceGap { .. } | Self::StoreUnavailable(_) => true,
            Self::ReadModel(error) => error.is_retryable(),
            Self::Store(_) | Self::Projector(_) | Self::Interrupted(_) => false,
        }
    }
}

impl From<EventStoreError> for ProjectionError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            other => Self::Store(other),
        }
    }
}
