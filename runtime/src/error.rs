//! Errors surfaced by the aggregate runtime and the restore coordinator.

use foldline_core::aggregate::FoldError;
use foldline_core::command::CommandCodecError;
use foldline_core::context::Interrupted;
use foldline_core::event::EventError;
use foldline_core::event_store::EventStoreError;
use foldline_core::stream::{AggregateType, StreamId, Version};
use thiserror::Error;

/// Boxed domain error used once a command has left its typed runtime.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Command error with the domain error erased, as returned by the command bus.
pub type DynCommandError = CommandError<BoxError>;

/// Why a command produced no events.
#[derive(Error, Debug)]
pub enum CommandError<E> {
    /// The aggregate rejected the command. Not retryable; fix the input.
    #[error("Command rejected: {0}")]
    Validation(E),

    /// No handler is registered for the command type.
    #[error("No handler registered for command type '{command_type}'")]
    UnhandledCommand {
        /// The unknown command type.
        command_type: String,
    },

    /// A second handler tried to register a command type.
    #[error("A handler is already registered for command type '{command_type}'")]
    HandlerAlreadyRegistered {
        /// The contested command type.
        command_type: String,
    },

    /// The envelope payload does not decode into the handler's command enum.
    #[error("Invalid command payload: {0}")]
    InvalidPayload(#[from] CommandCodecError),

    /// The envelope targets a stream of another aggregate type.
    #[error("Command for aggregate type {found} sent to {expected}")]
    AggregateMismatch {
        /// Aggregate type of the handler.
        expected: AggregateType,
        /// Aggregate type of the envelope's target.
        found: AggregateType,
    },

    /// Another writer kept appending to the stream; conflict retries are exhausted.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Contested stream.
        stream_id: StreamId,
        /// Version the runtime loaded.
        expected: Version,
        /// Version found in the log.
        actual: Version,
    },

    /// The event log could not be reached; store retries are exhausted.
    #[error("Event store unavailable: {0}")]
    StoreUnavailable(String),

    /// The event log rejected the call for a non-transient reason.
    #[error("Event store error: {0}")]
    Store(EventStoreError),

    /// The decided events could not be encoded.
    #[error("Event serialization failed: {0}")]
    Serialization(#[from] EventError),

    /// The stored history does not fold (wrong stream or broken sequence).
    #[error("Stored history is inconsistent: {0}")]
    Corrupted(FoldError),

    /// The context was cancelled or its deadline passed. Nothing was appended.
    #[error("Command interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl<E> CommandError<E> {
    /// Whether retrying the same command later may succeed.
    ///
    /// The core never retries these automatically; the decision is the caller's.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::StoreUnavailable(_)
        )
    }

    /// Whether the aggregate rejected the command.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Erase the domain error type.
    #[must_use]
    pub fn erase(self) -> DynCommandError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Validation(error) => CommandError::Validation(Box::new(error)),
            Self::UnhandledCommand { command_type } => CommandError::UnhandledCommand { command_type },
            Self::HandlerAlreadyRegistered { command_type } => {
                CommandError::HandlerAlreadyRegistered { command_type }
            }
            Self::InvalidPayload(error) => CommandError::InvalidPayload(error),
            Self::AggregateMismatch { expected, found } => {
                CommandError::AggregateMismatch { expected, found }
            }
            Self::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            } => CommandError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            },
            Self::StoreUnavailable(reason) => CommandError::StoreUnavailable(reason),
            Self::Store(error) => CommandError::Store(error),
            Self::Serialization(error) => CommandError::Serialization(error),
            Self::Corrupted(error) => CommandError::Corrupted(error),
            Self::Interrupted(reason) => CommandError::Interrupted(reason),
        }
    }
}

impl<E> From<EventStoreError> for CommandError<E> {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            },
            EventStoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            other => Self::Store(other),
        }
    }
}

/// Why a restore produced no aggregate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// The event log holds no events for this identity.
    #[error("Aggregate not found: {stream_id}")]
    AggregateNotFound {
        /// The requested stream.
        stream_id: StreamId,
    },

    /// The event log could not be reached; store retries are exhausted.
    #[error("Event store unavailable: {0}")]
    StoreUnavailable(String),

    /// The event log failed for a non-transient reason.
    #[error("Event store error: {0}")]
    Store(EventStoreError),

    /// The stored history does not fold.
    #[error("Stored history is inconsistent: {0}")]
    Corrupted(#[from] FoldError),

    /// The context was cancelled or its deadline passed.
    #[error("Restore interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl RestoreError {
    /// Whether retrying the restore later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Whether the identity has no history at all.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::AggregateNotFound { .. })
    }
}

impl From<EventStoreError> for RestoreError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            other => Self::Store(other),
        }
    }
}
