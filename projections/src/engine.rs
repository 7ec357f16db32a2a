//! Version-gated projection engine.
//!
//! # Version gate
//!
//! An entity at version `v` receiving event `s`:
//!
//! | condition   | outcome                                   |
//! |-------------|-------------------------------------------|
//! | `s == v+1`  | fold, set version to `s`, save            |
//! | `s <= v`    | duplicate or stale redelivery, no-op      |
//! | `s > v+1`   | gap: replay `v+1..s` from the event log   |
//!
//! Gaps are closed by reading the missing range from the event log and
//! folding it in order. When the log cannot supply the range yet, the
//! progress made so far is saved and [`ProjectionError::SequenceGap`] is
//! returned; it is retryable, so the dispatcher redelivers with backoff.
//!
//! Events of a type the projector does not know, and events whose payload
//! does not decode, advance the version without touching the entity. This is
//! the rule aggregate restores follow too, so the version always equals the
//! stream position of the last event folded and a bad payload never stalls
//! the read model.

use crate::error::ProjectionError;
use crate::visibility::{ReadSide, VisibilityConfig};
use foldline_core::context::Context;
use foldline_core::event::RecordedEvent;
use foldline_core::event_store::{EventStore, EventStoreError, load_events};
use foldline_core::projection::{Projector, ReadModel, ReadModelError, ReadModelStore};
use foldline_core::stream::{AggregateId, StreamId, Version};
use foldline_runtime::locks::KeyedLocks;
use foldline_runtime::metrics::ProjectionMetrics;
use foldline_runtime::retry::{RetryPolicy, retry_with_predicate};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// Result of gating one event against an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectOutcome<E> {
    /// The event was the next in sequence; this is the new entity.
    Applied(E),
    /// The entity already contains the event.
    Duplicate,
    /// The event belongs to a stream this projector does not follow.
    Ignored,
    /// Events are missing between the entity and this event.
    Gap {
        /// The version the next event must carry.
        expected: Version,
        /// The version that was delivered.
        found: Version,
    },
}

/// What [`ProjectionEngine::handle`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The entity was written at `version`.
    Applied {
        /// Version of the saved entity.
        version: Version,
        /// Events read back from the log to close a gap first.
        replayed: usize,
    },
    /// Already folded. Nothing was written.
    Duplicate,
    /// Not followed by this projector. Nothing was written.
    Ignored,
}

/// Maintains the read models of one projector.
///
/// The engine is the only writer of its [`ReadModelStore`]. Writes for one
/// entity are serialized; different entities are projected in parallel.
pub struct ProjectionEngine<P: Projector> {
    projector: Arc<P>,
    store: Arc<dyn ReadModelStore<P::Entity>>,
    events: Arc<dyn EventStore>,
    locks: KeyedLocks<AggregateId>,
    retry: RetryPolicy,
}

impl<P: Projector> ProjectionEngine<P> {
    /// An engine writing to `store` and replaying gaps from `events`.
    #[must_use]
    pub fn new(
        projector: P,
        store: Arc<dyn ReadModelStore<P::Entity>>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            projector: Arc::new(projector),
            store,
            events,
            locks: KeyedLocks::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the backoff used when the read-model store or event log is unavailable.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The projector driving this engine.
    #[must_use]
    pub fn projector(&self) -> &P {
        &self.projector
    }

    /// Query access to the read models this engine writes.
    #[must_use]
    pub fn read_side(&self, config: VisibilityConfig) -> ReadSide<P::Entity> {
        ReadSide::new(
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            P::AGGREGATE_TYPE,
            config,
        )
    }

    /// Gate `recorded` against `prior` and fold it if it is next in sequence.
    ///
    /// Pure apart from the context check: nothing is read or written.
    /// A missing `prior` is treated as a fresh entity at version 0.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Projector`] if the projector refuses the event
    /// - [`ProjectionError::Interrupted`] if `ctx` has ended
    pub fn project(
        &self,
        ctx: &Context,
        recorded: &RecordedEvent,
        prior: Option<P::Entity>,
    ) -> Result<ProjectOutcome<P::Entity>, ProjectionError> {
        ctx.check()?;
        if !follows::<P>(recorded) {
            return Ok(ProjectOutcome::Ignored);
        }

        let entity = prior.unwrap_or_else(|| self.projector.new_entity(recorded.aggregate_id()));
        let current = entity.version();
        if recorded.version <= current {
            return Ok(ProjectOutcome::Duplicate);
        }
        if !recorded.version.follows(current) {
            return Ok(ProjectOutcome::Gap {
                expected: current.next(),
                found: recorded.version,
            });
        }

        // Skipped events still advance the version, as restores do.
        let mut entity = match recorded.decode::<P::Event>() {
            Ok(Some(event)) => self.projector.project(&event, recorded, entity)?,
            Ok(None) => {
                tracing::debug!(
                    projector = P::PROJECTOR_TYPE,
                    event_type = recorded.event_type(),
                    "Unknown event type, advancing version only"
                );
                entity
            }
            Err(error) => {
                tracing::warn!(
                    projector = P::PROJECTOR_TYPE,
                    event = %recorded,
                    %error,
                    "Skipping undecodable event, advancing version only"
                );
                entity
            }
        };
        entity.set_version(recorded.version);
        Ok(ProjectOutcome::Applied(entity))
    }

    /// Load, gate and save the entity `recorded` belongs to.
    ///
    /// Duplicates and streams this projector does not follow are silent
    /// no-ops. A gap is closed by replaying the missing range from the event log.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::SequenceGap`] if the log cannot close the gap yet (retryable)
    /// - [`ProjectionError::ReadModel`] or [`ProjectionError::StoreUnavailable`]
    ///   once store retries are exhausted
    /// - any error of [`project`](Self::project)
    pub async fn handle(&self, ctx: &Context, recorded: &RecordedEvent) -> Result<Handled, ProjectionError> {
        if !follows::<P>(recorded) {
            ProjectionMetrics::record(P::PROJECTOR_TYPE, "ignored");
            return Ok(Handled::Ignored);
        }

        let span = tracing::debug_span!(
            "projection",
            projector = P::PROJECTOR_TYPE,
            stream_id = %recorded.stream_id,
            version = %recorded.version,
        );
        let result = self.handle_locked(ctx, recorded).instrument(span.clone()).await;

        let _entered = span.enter();
        let outcome = match &result {
            Ok(Handled::Applied { replayed: 0, .. }) => "applied",
            Ok(Handled::Applied { replayed, .. }) => {
                tracing::info!(replayed, "Gap closed from event log");
                "replayed"
            }
            Ok(Handled::Duplicate) => {
                tracing::debug!("Duplicate event dropped");
                "duplicate"
            }
            Ok(Handled::Ignored) => "ignored",
            Err(error @ ProjectionError::SequenceGap { .. }) => {
                tracing::warn!(%error, "Projection waiting for missing events");
                "gap"
            }
            Err(error) => {
                tracing::error!(%error, "Projection failed");
                "failed"
            }
        };
        ProjectionMetrics::record(P::PROJECTOR_TYPE, outcome);
        result
    }

    /// Bring the entity of `id` up to date with the event log.
    ///
    /// Used for projections created after events already exist. Returns
    /// `None` when neither the store nor the log knows `id`.
    ///
    /// # Errors
    ///
    /// Store, log and projector errors as for [`handle`](Self::handle).
    pub async fn catch_up(&self, ctx: &Context, id: &AggregateId) -> Result<Option<P::Entity>, ProjectionError> {
        let _guard = ctx.run(self.locks.lock(id.clone())).await?;
        let prior = self.find(ctx, id).await?;
        let caught_up = self.replay(ctx, id, prior).await?;
        if caught_up.is_some() {
            ProjectionMetrics::record(P::PROJECTOR_TYPE, "caught_up");
        }
        Ok(caught_up)
    }

    /// Discard the entity of `id` and fold its whole history again.
    ///
    /// The stored entity is replaced in one write, so readers never see it
    /// disappear while it is being rebuilt. If the log holds no events for
    /// `id` the entity is removed.
    ///
    /// # Errors
    ///
    /// Store, log and projector errors as for [`handle`](Self::handle).
    pub async fn rebuild(&self, ctx: &Context, id: &AggregateId) -> Result<Option<P::Entity>, ProjectionError> {
        let _guard = ctx.run(self.locks.lock(id.clone())).await?;
        let rebuilt = self.replay(ctx, id, None).await?;
        if rebuilt.is_none() {
            self.remove(ctx, id).await?;
        }
        tracing::info!(projector = P::PROJECTOR_TYPE, aggregate_id = %id, "Read model rebuilt");
        ProjectionMetrics::record(P::PROJECTOR_TYPE, "rebuilt");
        Ok(rebuilt)
    }

    async fn handle_locked(&self, ctx: &Context, recorded: &RecordedEvent) -> Result<Handled, ProjectionError> {
        let id = recorded.aggregate_id();
        let _guard = ctx.run(self.locks.lock(id.clone())).await?;
        let prior = self.find(ctx, id).await?;

        match self.project(ctx, recorded, prior.clone())? {
            ProjectOutcome::Applied(entity) => {
                let version = entity.version();
                self.save(ctx, entity).await?;
                Ok(Handled::Applied { version, replayed: 0 })
            }
            ProjectOutcome::Duplicate => Ok(Handled::Duplicate),
            ProjectOutcome::Ignored => Ok(Handled::Ignored),
            ProjectOutcome::Gap { expected, found } => {
                tracing::debug!(%expected, %found, "Sequence gap, replaying missing range");
                self.fill_gap(ctx, recorded, prior).await
            }
        }
    }

    /// Fold the events between `prior` and `recorded` from the log, then
    /// `recorded` itself.
    async fn fill_gap(
        &self,
        ctx: &Context,
        recorded: &RecordedEvent,
        prior: Option<P::Entity>,
    ) -> Result<Handled, ProjectionError> {
        let found = recorded.version;
        let mut entity = prior.unwrap_or_else(|| self.projector.new_entity(recorded.aggregate_id()));
        let loaded_at = entity.version();

        let missing = self.load(ctx, &recorded.stream_id, loaded_at).await?;
        let mut replayed = 0;
        for event in missing.iter().take_while(|event| event.version < found) {
            match self.project(ctx, event, Some(entity.clone()))? {
                ProjectOutcome::Applied(next) => {
                    entity = next;
                    replayed += 1;
                }
                ProjectOutcome::Duplicate | ProjectOutcome::Ignored => {}
                ProjectOutcome::Gap { .. } => break,
            }
        }

        match self.project(ctx, recorded, Some(entity.clone()))? {
            ProjectOutcome::Applied(next) => {
                let version = next.version();
                self.save(ctx, next).await?;
                Ok(Handled::Applied { version, replayed })
            }
            ProjectOutcome::Duplicate | ProjectOutcome::Ignored => {
                if entity.version() > loaded_at {
                    self.save(ctx, entity).await?;
                }
                Ok(Handled::Duplicate)
            }
            ProjectOutcome::Gap { expected, .. } => {
                let available = entity.version();
                if available > loaded_at {
                    self.save(ctx, entity).await?;
                }
                Err(ProjectionError::SequenceGap {
                    stream_id: recorded.stream_id.clone(),
                    expected,
                    available,
                    found,
                })
            }
        }
    }

    /// Fold every logged event after `prior` and save the result.
    async fn replay(
        &self,
        ctx: &Context,
        id: &AggregateId,
        prior: Option<P::Entity>,
    ) -> Result<Option<P::Entity>, ProjectionError> {
        let stream_id = StreamId::new(P::AGGREGATE_TYPE, id.clone());
        let existed = prior.is_some();
        let mut entity = prior.unwrap_or_else(|| self.projector.new_entity(id));
        let from = entity.version();

        let events = self.load(ctx, &stream_id, from).await?;
        for event in &events {
            match self.project(ctx, event, Some(entity.clone()))? {
                ProjectOutcome::Applied(next) => entity = next,
                ProjectOutcome::Duplicate | ProjectOutcome::Ignored => {}
                ProjectOutcome::Gap { expected, found } => {
                    return Err(ProjectionError::SequenceGap {
                        stream_id,
                        expected,
                        available: entity.version(),
                        found,
                    });
                }
            }
        }

        if entity.version() > from {
            tracing::debug!(
                projector = P::PROJECTOR_TYPE,
                aggregate_id = %id,
                from = %from,
                to = %entity.version(),
                "Read model replayed from event log"
            );
            self.save(ctx, entity.clone()).await?;
            Ok(Some(entity))
        } else if existed {
            Ok(Some(entity))
        } else {
            Ok(None)
        }
    }

    async fn find(&self, ctx: &Context, id: &AggregateId) -> Result<Option<P::Entity>, ProjectionError> {
        let store = self.store.as_ref();
        let find = retry_with_predicate(&self.retry, move || store.find(id), ReadModelError::is_retryable);
        Ok(ctx.run(find).await??)
    }

    async fn save(&self, ctx: &Context, entity: P::Entity) -> Result<(), ProjectionError> {
        let store = self.store.as_ref();
        let save = retry_with_predicate(
            &self.retry,
            move || store.save(entity.clone()),
            ReadModelError::is_retryable,
        );
        Ok(ctx.run(save).await??)
    }

    async fn remove(&self, ctx: &Context, id: &AggregateId) -> Result<(), ProjectionError> {
        let store = self.store.as_ref();
        let remove = retry_with_predicate(&self.retry, move || store.remove(id), ReadModelError::is_retryable);
        Ok(ctx.run(remove).await??)
    }

    async fn load(
        &self,
        ctx: &Context,
        stream_id: &StreamId,
        after: Version,
    ) -> Result<Vec<RecordedEvent>, ProjectionError> {
        let events = self.events.as_ref();
        let load = retry_with_predicate(
            &self.retry,
            move || load_events(events, stream_id.clone(), after),
            EventStoreError::is_retryable,
        );
        Ok(ctx.run(load).await??)
    }
}

impl<P: Projector> fmt::Debug for ProjectionEngine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("projector", &P::PROJECTOR_TYPE)
            .field("aggregate_type", &P::AGGREGATE_TYPE)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn follows<P: Projector>(recorded: &RecordedEvent) -> bool {
    recorded.aggregate_type().as_str() == P::AGGREGATE_TYPE
}
