//! Read-model contracts: projectors, versioned entities and their stores.
//!
//! # Overview
//!
//! Projections are the **query side of CQRS**. A [`Projector`] folds the
//! events of one aggregate stream into a [`ReadModel`] entity. Every entity
//! carries the version of the last event folded into it, which lets the
//! projection engine reject duplicates and detect gaps. Entities live in a
//! [`ReadModelStore`] owned by exactly one projection engine.
//!
//! ```text
//! Write Side:                  Read Side:
//! ┌─────────────────┐         ┌─────────────────┐
//! │   Event Log     │         │ ReadModelStore  │
//! └─────────────────┘         └─────────────────┘
//!         │                            ▲
//!         │ Events published           │ Written only by
//!         │ to the event bus           │ the projection engine
//!         ▼                            │
//! ┌──────────────────────────────────────┐
//! │             Event Bus                │
//! └──────────────────────────────────────┘
//! ```

use crate::event::{Event, RecordedEvent};
use crate::stream::{AggregateId, Version};
use std::future::Future;
use std::pin::Pin;

/// Error type for read-model store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadModelError {
    /// The store cannot be reached. Transient; retry with backoff.
    #[error("Read-model store unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ReadModelError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A projector rejected an event it claims to understand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Projector {projector} cannot apply {event_type}: {reason}")]
pub struct ProjectorError {
    /// Projector type.
    pub projector: String,
    /// Event type.
    pub event_type: String,
    /// Why the event cannot be applied.
    pub reason: String,
}

/// A versioned read-model entity.
pub trait ReadModel: Clone + Send + Sync + 'static {
    /// Identity of the entity (the aggregate it follows).
    fn id(&self) -> &AggregateId;

    /// Version of the last event folded into the entity.
    fn version(&self) -> Version;

    /// Set the version. Only the projection engine calls this.
    fn set_version(&mut self, version: Version);
}

/// Folds the events of one aggregate type into read-model entities.
///
/// `project` must be pure: the same event applied to equal entities yields
/// equal entities. Version bookkeeping is the engine's job, not the projector's.
pub trait Projector: Send + Sync + 'static {
    /// Name of this projector (logs, metrics).
    const PROJECTOR_TYPE: &'static str;

    /// Aggregate type whose streams this projector follows.
    const AGGREGATE_TYPE: &'static str;

    /// The events this projector understands.
    type Event: Event;

    /// The read model this projector maintains.
    type Entity: ReadModel;

    /// A fresh entity at version 0.
    fn new_entity(&self, id: &AggregateId) -> Self::Entity;

    /// Fold one event into the entity.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectorError`] if the event cannot be applied to this entity.
    fn project(
        &self,
        event: &Self::Event,
        recorded: &RecordedEvent,
        entity: Self::Entity,
    ) -> Result<Self::Entity, ProjectorError>;
}

/// Storage backend for read-model entities.
///
/// # Dyn Compatibility
///
/// Uses `Pin<Box<dyn Future>>` so a store can be shared as
/// `Arc<dyn ReadModelStore<E>>`.
pub trait ReadModelStore<E: ReadModel>: Send + Sync {
    /// Find an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Unavailable`] if the store cannot be reached.
    fn find<'a>(
        &'a self,
        id: &'a AggregateId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<E>, ReadModelError>> + Send + 'a>>;

    /// Insert or replace an entity.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Unavailable`] if the store cannot be reached.
    fn save(&self, entity: E) -> Pin<Box<dyn Future<Output = Result<(), ReadModelError>> + Send + '_>>;

    /// Every stored entity.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Unavailable`] if the store cannot be reached.
    fn find_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<E>, ReadModelError>> + Send + '_>>;

    /// Remove one entity. Used when rebuilding it from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Unavailable`] if the store cannot be reached.
    fn remove<'a>(
        &'a self,
        id: &'a AggregateId,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReadModelError>> + Send + 'a>>;

    /// Remove every entity.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Unavailable`] if the store cannot be reached.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), ReadModelError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projector_error_display() {
        let error = ProjectorError {
            projector: "TemperatureReadProjector".to_string(),
            event_type: "TemperatureReported".to_string(),
            reason: "entity is for another station".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Projector TemperatureReadProjector cannot apply TemperatureReported: entity is for another station"
        );
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(ReadModelError::Unavailable("down".into()).is_retryable());
        assert!(!ReadModelError::Serialization("bad".into()).is_retryable());
    }
}
