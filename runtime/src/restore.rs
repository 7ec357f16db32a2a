//! Restore coordinator: rebuild aggregates by replaying the event log.
//!
//! A restore is a pure read followed by a fold. It never writes to the event
//! log and keeps no state between calls, so concurrent restores of the same
//! identity are safe and, observing the same history, return equal roots.
//!
//! [`RestoreCache`] is an optional decorator that keeps the last root per
//! identity and only replays the events appended since.

use crate::error::RestoreError;
use crate::metrics::RestoreMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use foldline_core::aggregate::{Aggregate, AggregateRoot};
use foldline_core::context::Context;
use foldline_core::event::RecordedEvent;
use foldline_core::event_store::{EventStore, EventStoreError, load_events};
use foldline_core::stream::{AggregateId, StreamId, Version};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Rebuilds aggregates of type `A` from the event log.
pub struct RestoreCoordinator<A: Aggregate> {
    store: Arc<dyn EventStore>,
    retry: RetryPolicy,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> RestoreCoordinator<A> {
    /// A coordinator reading from `store` with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            _aggregate: PhantomData,
        }
    }

    /// Set the backoff used when the event log is unavailable.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rebuild the current state of `id` from its full history.
    ///
    /// # Errors
    ///
    /// - [`RestoreError::AggregateNotFound`] if the log holds no events for `id`
    /// - [`RestoreError::StoreUnavailable`] once store retries are exhausted
    /// - [`RestoreError::Corrupted`] if the stored history does not fold
    /// - [`RestoreError::Interrupted`] if `ctx` is cancelled or expires
    pub async fn restore(&self, ctx: &Context, id: &AggregateId) -> Result<AggregateRoot<A>, RestoreError> {
        let started = Instant::now();
        let result = self.replay(ctx, AggregateRoot::new(id.clone())).await;

        let result = match result {
            Ok(root) if root.version().is_initial() => Err(RestoreError::AggregateNotFound {
                stream_id: root.stream_id().clone(),
            }),
            other => other,
        };

        let outcome = match &result {
            Ok(root) => {
                tracing::debug!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    aggregate_id = %id,
                    version = %root.version(),
                    "Aggregate restored"
                );
                "restored"
            }
            Err(RestoreError::AggregateNotFound { .. }) => "not_found",
            Err(error) => {
                tracing::warn!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    aggregate_id = %id,
                    %error,
                    "Restore failed"
                );
                "failed"
            }
        };
        RestoreMetrics::record(A::AGGREGATE_TYPE, outcome, started.elapsed());
        result
    }

    /// Fold every event after `root.version()` onto `root`.
    ///
    /// This is the shared folding step behind restores, cache refreshes and
    /// catch-up.
    ///
    /// # Errors
    ///
    /// Same as [`restore`](Self::restore), except that an empty history is not an error.
    pub async fn replay(
        &self,
        ctx: &Context,
        mut root: AggregateRoot<A>,
    ) -> Result<AggregateRoot<A>, RestoreError> {
        let events = self.load(ctx, root.stream_id(), root.version()).await?;
        for event in &events {
            root.apply_recorded(event)?;
        }
        Ok(root)
    }

    /// Read the events of `stream_id` after `after`, retrying while the store
    /// is unavailable.
    ///
    /// # Errors
    ///
    /// [`RestoreError::StoreUnavailable`] once retries are exhausted,
    /// [`RestoreError::Interrupted`] if `ctx` ends first.
    pub async fn load(
        &self,
        ctx: &Context,
        stream_id: &StreamId,
        after: Version,
    ) -> Result<Vec<RecordedEvent>, RestoreError> {
        let store = self.store.as_ref();
        let load = retry_with_predicate(
            &self.retry,
            move || load_events(store, stream_id.clone(), after),
            EventStoreError::is_retryable,
        );
        Ok(ctx.run(load).await??)
    }
}

impl<A: Aggregate> Clone for RestoreCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> fmt::Debug for RestoreCoordinator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreCoordinator")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Caching decorator over a [`RestoreCoordinator`].
///
/// A cached root is refreshed by replaying only the events after its version,
/// so the result is the same as a full restore. The cache is not aware of
/// [`EventStore::clear`]; call [`RestoreCache::clear`] alongside it.
pub struct RestoreCache<A: Aggregate> {
    coordinator: RestoreCoordinator<A>,
    roots: Mutex<HashMap<AggregateId, AggregateRoot<A>>>,
}

impl<A: Aggregate> RestoreCache<A> {
    /// An empty cache in front of `coordinator`.
    #[must_use]
    pub fn new(coordinator: RestoreCoordinator<A>) -> Self {
        Self {
            coordinator,
            roots: Mutex::new(HashMap::new()),
        }
    }

    /// Restore `id`, starting from the cached root when there is one.
    ///
    /// # Errors
    ///
    /// See [`RestoreCoordinator::restore`].
    pub async fn restore(&self, ctx: &Context, id: &AggregateId) -> Result<AggregateRoot<A>, RestoreError> {
        let cached = self.cached(id);
        let root = match cached {
            Some(root) => self.coordinator.replay(ctx, root).await?,
            None => self.coordinator.restore(ctx, id).await?,
        };
        self.put(root.clone());
        Ok(root)
    }

    /// Remember `root` unless a newer root is already cached.
    pub fn put(&self, root: AggregateRoot<A>) {
        let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        let newer_cached = roots
            .get(root.id())
            .is_some_and(|cached| cached.version() > root.version());
        if !newer_cached {
            roots.insert(root.id().clone(), root);
        }
    }

    /// The cached root of `id`, if any.
    #[must_use]
    pub fn cached(&self, id: &AggregateId) -> Option<AggregateRoot<A>> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Forget `id`.
    pub fn invalidate(&self, id: &AggregateId) {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The wrapped coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &RestoreCoordinator<A> {
        &self.coordinator
    }
}

impl<A: Aggregate> fmt::Debug for RestoreCache<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreCache")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
