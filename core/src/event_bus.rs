//! Event bus abstraction: at-least-once fan-out of committed events.
//!
//! Events flow from the event log (source of truth) through the event bus to
//! projections, observers and other subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Command   │
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────────┐
//! │   Aggregate     │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 1. Append batch │◄─── Source of truth
//! │  to event log   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │
//! │    event bus    │◄─── At-least-once delivery
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     │         │
//!     ▼         ▼
//! ┌───────┐ ┌────────┐
//! │ Proj. │ │Observer│
//! └───────┘ └────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Log first**: events are appended to the event log before publishing
//! - **At-least-once delivery**: a handler may see an event more than once
//! - **Idempotency**: handlers must tolerate duplicates
//! - **Ordered per stream**: events of one aggregate reach a handler in append order
//! - **Isolation**: one failing handler never blocks delivery to the others

use crate::context::Context;
use crate::event::RecordedEvent;
use crate::stream::{AggregateType, StreamId, Version};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// The bus has been shut down.
    #[error("Event bus is closed")]
    Closed,

    /// Publishing failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribing failed.
    #[error("Subscription failed for handler '{handler}': {reason}")]
    SubscriptionFailed {
        /// Name of the handler.
        handler: String,
        /// The reason for failure.
        reason: String,
    },
}

/// Outcome of a failed handler invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler may succeed if the delivery is retried.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying the same event will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The handler did not finish within the dispatcher's per-handler timeout.
    #[error("handler timed out")]
    Timeout,

    /// The handler's delivery queue was full, so the event was not queued.
    ///
    /// Raised by the dispatcher, never by handlers. The handler is too slow
    /// for the publish rate; a projection closes the hole from the event log
    /// on its next delivery.
    #[error("delivery queue full")]
    QueueFull,

    /// The handler's worker has stopped, so the event was not queued.
    #[error("handler worker stopped")]
    Disconnected,
}

impl HandlerError {
    /// Whether the dispatcher should retry the delivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}

/// Selects which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMatcher {
    /// Every event.
    Any,

    /// Events whose type is in the list.
    EventTypes(Vec<String>),

    /// Events from streams of the listed aggregate types.
    AggregateTypes(Vec<AggregateType>),
}

impl EventMatcher {
    /// Match events of any of the given types.
    #[must_use]
    pub fn event_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::EventTypes(types.into_iter().map(Into::into).collect())
    }

    /// Match events of any of the given aggregate types.
    #[must_use]
    pub fn aggregate_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AggregateType>,
    {
        Self::AggregateTypes(types.into_iter().map(Into::into).collect())
    }

    /// Whether `event` is selected.
    #[must_use]
    pub fn matches(&self, event: &RecordedEvent) -> bool {
        match self {
            Self::Any => true,
            Self::EventTypes(types) => types.iter().any(|t| t == event.event_type()),
            Self::AggregateTypes(types) => types.iter().any(|t| t == event.aggregate_type()),
        }
    }
}

/// A subscriber of the event bus.
///
/// # Dyn Compatibility
///
/// Uses `Pin<Box<dyn Future>>` so handlers can be shared as `Arc<dyn EventHandler>`.
pub trait EventHandler: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Process one delivered event.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Transient`] to ask for a redelivery, or
    /// [`HandlerError::Permanent`] to give up on this event.
    fn handle<'a>(
        &'a self,
        ctx: &'a Context,
        event: &'a RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;
}

/// Asynchronous delivery failure, reported on the bus's error stream.
///
/// Diagnostic only: the bus has already given up on this delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    /// Name of the handler that failed.
    pub handler: String,
    /// Stream of the event.
    pub stream_id: StreamId,
    /// Version of the event.
    pub version: Version,
    /// Type of the event.
    pub event_type: String,
    /// How many delivery attempts were made.
    pub attempts: usize,
    /// The last failure.
    pub error: HandlerError,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler '{}' failed on {}@{} {} after {} attempt(s): {}",
            self.handler, self.stream_id, self.version, self.event_type, self.attempts, self.error
        )
    }
}

impl std::error::Error for DispatchError {}

/// Identifies a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the bus can be shared as
/// `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Hand committed events to every matching subscription.
    ///
    /// Returns once the events are queued; handlers run asynchronously.
    /// Callers must not assume subscribers have processed the events.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Closed`] if the bus is shut down, or
    /// [`EventBusError::PublishFailed`] if the events could not be queued.
    fn publish<'a>(
        &'a self,
        ctx: &'a Context,
        events: &'a [RecordedEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

    /// Register `handler` for the events selected by `matcher`.
    ///
    /// Only events published after the call are delivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] or [`EventBusError::Closed`].
    fn subscribe(
        &self,
        matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, EventBusError>;

    /// Stream of asynchronous delivery failures, for logging.
    fn errors(&self) -> broadcast::Receiver<DispatchError>;
}
