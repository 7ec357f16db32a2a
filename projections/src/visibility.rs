//! Read-side queries that wait for eventual consistency.
//!
//! Projections lag the event log. A caller that has just executed a command
//! and wants to read the result polls with a bounded [`RetryPolicy`] and
//! gets a [`Visibility`] back instead of blocking forever.

use crate::error::ProjectionError;
use foldline_core::context::Context;
use foldline_core::event_store::{EventStore, EventStoreError};
use foldline_core::projection::{ReadModel, ReadModelStore};
use foldline_core::stream::{AggregateId, AggregateType, StreamId, Version};
use foldline_runtime::retry::RetryPolicy;
use futures::TryStreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How long a read waits for a projection to catch up.
#[derive(Debug, Clone)]
pub struct VisibilityConfig {
    /// Polling schedule. `max_attempts()` reads are made.
    pub policy: RetryPolicy,
}

impl Default for VisibilityConfig {
    /// 10 reads, 100 ms apart.
    fn default() -> Self {
        Self {
            policy: RetryPolicy::fixed(9, Duration::from_millis(100)),
        }
    }
}

impl VisibilityConfig {
    /// Poll with `policy`.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Replace the polling schedule.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Outcome of waiting for a read model.
#[derive(Debug, Clone, PartialEq)]
pub enum Visibility<E> {
    /// The entity reached the requested version.
    Visible(E),
    /// The projection has not caught up yet. `observed` is the version it
    /// was last seen at, `None` if it has not been written at all.
    NotYetVisible {
        /// Last version read from the store.
        observed: Option<Version>,
    },
    /// The event log holds no events for this identity.
    Absent,
}

impl<E> Visibility<E> {
    /// Whether the entity was found at the requested version.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        matches!(self, Self::Visible(_))
    }

    /// The entity, if visible.
    #[must_use]
    pub fn into_entity(self) -> Option<E> {
        match self {
            Self::Visible(entity) => Some(entity),
            Self::NotYetVisible { .. } | Self::Absent => None,
        }
    }
}

/// Query handle over the read models of one projector.
pub struct ReadSide<E: ReadModel> {
    store: Arc<dyn ReadModelStore<E>>,
    events: Arc<dyn EventStore>,
    aggregate_type: AggregateType,
    config: VisibilityConfig,
}

impl<E: ReadModel> ReadSide<E> {
    /// Query `store`, consulting `events` (streams of `aggregate_type`) to
    /// tell a lagging projection from an unknown identity.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReadModelStore<E>>,
        events: Arc<dyn EventStore>,
        aggregate_type: impl Into<AggregateType>,
        config: VisibilityConfig,
    ) -> Self {
        Self {
            store,
            events,
            aggregate_type: aggregate_type.into(),
            config,
        }
    }

    /// Read the entity of `id` once.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::ReadModel`] if the store fails.
    pub async fn find(&self, ctx: &Context, id: &AggregateId) -> Result<Option<E>, ProjectionError> {
        Ok(ctx.run(self.store.find(id)).await??)
    }

    /// Read every entity once.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::ReadModel`] if the store fails.
    pub async fn find_all(&self, ctx: &Context) -> Result<Vec<E>, ProjectionError> {
        Ok(ctx.run(self.store.find_all()).await??)
    }

    /// Poll until the entity of `id` reaches `min_version`.
    ///
    /// Pass [`Version::INITIAL`] to accept any written version. Transient
    /// store failures count as a miss; other failures end the wait.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::ReadModel`] on a non-retryable store failure
    /// - [`ProjectionError::Interrupted`] if `ctx` ends while waiting
    pub async fn await_entity(
        &self,
        ctx: &Context,
        id: &AggregateId,
        min_version: Version,
    ) -> Result<Visibility<E>, ProjectionError> {
        let attempts = self.config.policy.max_attempts();
        let mut observed = None;

        for attempt in 0..attempts {
            match self.find(ctx, id).await {
                Ok(Some(entity)) if entity.version() >= min_version && !entity.version().is_initial() => {
                    return Ok(Visibility::Visible(entity));
                }
                Ok(Some(entity)) => observed = Some(entity.version()),
                Ok(None) => {}
                Err(ProjectionError::ReadModel(error)) if error.is_retryable() => {
                    tracing::warn!(aggregate_id = %id, %error, "Read-model store unavailable while polling");
                }
                Err(error) => return Err(error),
            }
            self.pause(ctx, attempt, attempts).await?;
        }

        if observed.is_none() && !self.has_events(ctx, id).await? {
            return Ok(Visibility::Absent);
        }
        tracing::debug!(aggregate_id = %id, %min_version, ?observed, "Read model not yet visible");
        Ok(Visibility::NotYetVisible { observed })
    }

    /// Poll until at least `min_count` entities exist.
    ///
    /// Returns the last listing read, which holds fewer than `min_count`
    /// entities if the projection did not catch up in time.
    ///
    /// # Errors
    ///
    /// Same as [`await_entity`](Self::await_entity).
    pub async fn await_all(&self, ctx: &Context, min_count: usize) -> Result<Vec<E>, ProjectionError> {
        let attempts = self.config.policy.max_attempts();
        let mut listing = Vec::new();

        for attempt in 0..attempts {
            match self.find_all(ctx).await {
                Ok(all) if all.len() >= min_count => return Ok(all),
                Ok(all) => listing = all,
                Err(ProjectionError::ReadModel(error)) if error.is_retryable() => {
                    tracing::warn!(%error, "Read-model store unavailable while polling");
                }
                Err(error) => return Err(error),
            }
            self.pause(ctx, attempt, attempts).await?;
        }

        tracing::debug!(found = listing.len(), min_count, "Read models not yet visible");
        Ok(listing)
    }

    async fn pause(&self, ctx: &Context, attempt: usize, attempts: usize) -> Result<(), ProjectionError> {
        if attempt + 1 < attempts {
            let delay = self.config.policy.jittered_delay(attempt);
            ctx.run(tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }

    async fn has_events(&self, ctx: &Context, id: &AggregateId) -> Result<bool, ProjectionError> {
        let stream_id = StreamId::new(self.aggregate_type.clone(), id.clone());
        let first = async {
            let mut events = self.events.load_stream(stream_id, Version::INITIAL).await?;
            Ok::<_, EventStoreError>(events.try_next().await?)
        };
        Ok(ctx.run(first).await??.is_some())
    }
}

impl<E: ReadModel> Clone for ReadSide<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            aggregate_type: self.aggregate_type.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: ReadModel> fmt::Debug for ReadSide<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSide")
            .field("aggregate_type", &self.aggregate_type)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
