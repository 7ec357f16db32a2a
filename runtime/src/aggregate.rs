//! Aggregate runtime: the validate-then-append cycle for one aggregate type.
//!
//! # Command flow
//!
//! 1. Take the per-identity lock (one in-flight command per aggregate in
//!    this process; other aggregates run in parallel)
//! 2. Load the current root through the restore coordinator (or cache)
//! 3. Let the aggregate decide the events
//! 4. Number them `v+1..=v+n` and append the batch atomically with
//!    `expected_version = v`
//! 5. Publish the committed batch on the event bus
//!
//! A concurrency conflict at step 4 means another process wrote the stream;
//! the runtime reloads and re-runs the command a bounded number of times.

use crate::command_bus::CommandHandler;
use crate::config::RuntimeConfig;
use crate::error::{CommandError, DynCommandError, RestoreError};
use crate::locks::KeyedLocks;
use crate::metrics::CommandMetrics;
use crate::restore::{RestoreCache, RestoreCoordinator};
use crate::retry::retry_with_predicate;
use foldline_core::aggregate::{Aggregate, AggregateRoot};
use foldline_core::command::{Command, CommandEnvelope};
use foldline_core::context::Context;
use foldline_core::environment::Clock;
use foldline_core::event::RecordedEvent;
use foldline_core::event_bus::EventBus;
use foldline_core::event_store::{EventStore, EventStoreError};
use foldline_core::stream::{AggregateId, AggregateType, StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// Stream version after the command. Unchanged if no events were emitted.
    pub version: Version,
    /// The committed events, in order.
    pub events: Vec<RecordedEvent>,
}

/// Executes commands for aggregates of type `A`.
pub struct AggregateRuntime<A: Aggregate> {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    restorer: RestoreCoordinator<A>,
    cache: Option<Arc<RestoreCache<A>>>,
    locks: KeyedLocks<StreamId>,
    config: RuntimeConfig,
}

impl<A: Aggregate> AggregateRuntime<A> {
    /// Create a runtime over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        let restorer =
            RestoreCoordinator::new(Arc::clone(&store)).with_retry_policy(config.store_retry.clone());
        Self {
            store,
            bus,
            clock,
            restorer,
            cache: None,
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Load prior state through `cache` instead of a full restore per command.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<RestoreCache<A>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The restore coordinator this runtime loads state with.
    #[must_use]
    pub const fn restorer(&self) -> &RestoreCoordinator<A> {
        &self.restorer
    }

    /// Execute `command` against aggregate `id`.
    ///
    /// On success the events are committed to the event log and handed to the
    /// event bus; subscribers process them asynchronously.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Validation`] if the aggregate rejects the command
    /// - [`CommandError::ConcurrencyConflict`] if conflict retries are exhausted
    /// - [`CommandError::StoreUnavailable`] if store retries are exhausted
    /// - [`CommandError::Interrupted`] if `ctx` ends before the append
    pub async fn execute(
        &self,
        ctx: &Context,
        id: &AggregateId,
        command: A::Command,
    ) -> Result<CommandOutcome, CommandError<A::Error>> {
        let span = tracing::info_span!(
            "command",
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %id,
            command_type = command.command_type(),
            correlation_id = ctx.correlation_id().unwrap_or_default(),
        );

        let started = Instant::now();
        let result = self.execute_locked(ctx, id, &command).instrument(span.clone()).await;

        let _entered = span.enter();
        let outcome = match &result {
            Ok(outcome) => {
                tracing::info!(
                    version = %outcome.version,
                    events = outcome.events.len(),
                    "Command executed"
                );
                "accepted"
            }
            Err(CommandError::Validation(error)) => {
                tracing::warn!(%error, "Command rejected");
                "rejected"
            }
            Err(error) => {
                tracing::error!(%error, "Command failed");
                "failed"
            }
        };
        CommandMetrics::record(A::AGGREGATE_TYPE, outcome, started.elapsed());
        result
    }

    /// Pure fold step: apply one recorded event to a root.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Corrupted`] if the event does not continue the root.
    pub fn apply_event(
        mut root: AggregateRoot<A>,
        event: &RecordedEvent,
    ) -> Result<AggregateRoot<A>, CommandError<A::Error>> {
        root.apply_recorded(event).map_err(CommandError::Corrupted)?;
        Ok(root)
    }

    async fn execute_locked(
        &self,
        ctx: &Context,
        id: &AggregateId,
        command: &A::Command,
    ) -> Result<CommandOutcome, CommandError<A::Error>> {
        let stream_id = StreamId::new(A::AGGREGATE_TYPE, id.clone());
        let _guard = ctx.run(self.locks.lock(stream_id)).await?;

        let mut conflicts = 0;
        loop {
            let root = self.load(ctx, id).await?;
            let events = root.state().handle(command).map_err(CommandError::Validation)?;
            if events.is_empty() {
                return Ok(CommandOutcome {
                    version: root.version(),
                    events: Vec::new(),
                });
            }

            let metadata = ctx.event_metadata();
            let recorded = root.stamp(&events, self.clock.now(), metadata.as_ref())?;

            // Last point where the command may be abandoned. The append below
            // is a single call and is never interrupted.
            ctx.check()?;

            match self.append(root.stream_id(), root.version(), &recorded).await {
                Ok(version) => {
                    CommandMetrics::record_append(A::AGGREGATE_TYPE, recorded.len());
                    self.remember(root, &recorded)?;
                    self.publish(ctx, &recorded).await;
                    return Ok(CommandOutcome {
                        version,
                        events: recorded,
                    });
                }
                Err(CommandError::ConcurrencyConflict { expected, actual, .. })
                    if conflicts < self.config.conflict_retries =>
                {
                    conflicts += 1;
                    tracing::warn!(
                        %expected,
                        %actual,
                        attempt = conflicts,
                        "Concurrency conflict, reloading aggregate"
                    );
                    if let Some(cache) = &self.cache {
                        cache.invalidate(id);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn load(
        &self,
        ctx: &Context,
        id: &AggregateId,
    ) -> Result<AggregateRoot<A>, CommandError<A::Error>> {
        let restored = match &self.cache {
            Some(cache) => cache.restore(ctx, id).await,
            None => self.restorer.restore(ctx, id).await,
        };
        match restored {
            Ok(root) => Ok(root),
            Err(RestoreError::AggregateNotFound { .. }) => Ok(AggregateRoot::new(id.clone())),
            Err(RestoreError::StoreUnavailable(reason)) => Err(CommandError::StoreUnavailable(reason)),
            Err(RestoreError::Store(error)) => Err(CommandError::Store(error)),
            Err(RestoreError::Corrupted(error)) => Err(CommandError::Corrupted(error)),
            Err(RestoreError::Interrupted(reason)) => Err(CommandError::Interrupted(reason)),
        }
    }

    async fn append(
        &self,
        stream_id: &StreamId,
        expected: Version,
        events: &[RecordedEvent],
    ) -> Result<Version, CommandError<A::Error>> {
        let store = self.store.as_ref();
        let version = retry_with_predicate(
            &self.config.store_retry,
            move || store.append(stream_id.clone(), expected, events.to_vec()),
            EventStoreError::is_retryable,
        )
        .await?;
        Ok(version)
    }

    fn remember(
        &self,
        root: AggregateRoot<A>,
        recorded: &[RecordedEvent],
    ) -> Result<(), CommandError<A::Error>> {
        if let Some(cache) = &self.cache {
            let root = recorded.iter().try_fold(root, |root, event| Self::apply_event(root, event))?;
            cache.put(root);
        }
        Ok(())
    }

    async fn publish(&self, ctx: &Context, recorded: &[RecordedEvent]) {
        // The batch is committed; a bus failure must not fail the command.
        if let Err(error) = self.bus.publish(ctx, recorded).await {
            tracing::error!(%error, events = recorded.len(), "Failed to publish committed events");
            CommandMetrics::record_publish_failure(A::AGGREGATE_TYPE);
        }
    }
}

impl<A: Aggregate> CommandHandler for AggregateRuntime<A> {
    fn aggregate_type(&self) -> &'static str {
        A::AGGREGATE_TYPE
    }

    fn command_types(&self) -> &'static [&'static str] {
        <A::Command as Command>::COMMAND_TYPES
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a Context,
        envelope: CommandEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutcome, DynCommandError>> + Send + 'a>> {
        Box::pin(async move {
            let expected = AggregateType::new(A::AGGREGATE_TYPE);
            if envelope.target.aggregate_type() != &expected {
                return Err(CommandError::AggregateMismatch {
                    expected,
                    found: envelope.target.aggregate_type().clone(),
                });
            }
            let command = A::Command::from_envelope(&envelope)?;
            self.execute(ctx, envelope.target.aggregate_id(), command)
                .await
                .map_err(CommandError::erase)
        })
    }
}

impl<A: Aggregate> std::fmt::Debug for AggregateRuntime<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRuntime")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
