//! Application wiring: event log, bus, command routing and the optional
//! temperature projection.

use crate::config::Config;
use crate::domain::{StationCommand, WeatherStation};
use crate::observer::EventLogger;
use crate::projector::{Temperature, TemperatureReadProjector};
use foldline_core::aggregate::{Aggregate, AggregateRoot};
use foldline_core::command::{Command, CommandCodecError};
use foldline_core::context::Context;
use foldline_core::environment::SystemClock;
use foldline_core::event_bus::{EventBus, EventBusError, EventHandler, EventMatcher, SubscriptionId};
use foldline_core::event_store::{EventStore, EventStoreError};
use foldline_core::projection::{ReadModelError, ReadModelStore};
use foldline_core::stream::{AggregateId, StreamId, Version};
use foldline_projections::{
    ProjectionEngine, ProjectionError, ProjectionHandler, ReadSide, Visibility,
};
use foldline_runtime::error::RestoreError;
use foldline_runtime::{
    AggregateRuntime, CommandBus, CommandHandler, CommandOutcome, DynCommandError, EventDispatcher,
};
use foldline_testing::{InMemoryEventStore, InMemoryReadModelStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

/// Errors surfaced by [`WeatherStationApp`].
#[derive(Debug, Error)]
pub enum AppError {
    /// The command was rejected or could not be executed.
    #[error(transparent)]
    Command(#[from] DynCommandError),

    /// The command could not be encoded.
    #[error(transparent)]
    Codec(#[from] CommandCodecError),

    /// The station could not be restored.
    #[error(transparent)]
    Restore(#[from] RestoreError),

    /// The projection failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// The event bus refused a subscription.
    #[error(transparent)]
    Bus(#[from] EventBusError),

    /// The event log failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// The read-model store failed.
    #[error(transparent)]
    ReadModel(#[from] ReadModelError),

    /// A read-side operation was called before [`WeatherStationApp::add_projector`].
    #[error("no temperature projector has been added")]
    NoProjector,
}

struct Projection {
    engine: Arc<ProjectionEngine<TemperatureReadProjector>>,
    models: InMemoryReadModelStore<Temperature>,
    reads: ReadSide<Temperature>,
    subscription: SubscriptionId,
}

/// A complete weather-station deployment running in process.
///
/// Commands go through the [`CommandBus`] to the station runtime, which
/// appends to the event log and publishes on the dispatcher. An
/// [`EventLogger`] observes every event; the temperature projection is
/// attached on demand with [`add_projector`](Self::add_projector).
pub struct WeatherStationApp {
    config: Config,
    events: InMemoryEventStore,
    bus: Arc<EventDispatcher>,
    commands: CommandBus,
    runtime: Arc<AggregateRuntime<WeatherStation>>,
    logger: Arc<EventLogger>,
    projection: Option<Projection>,
}

impl WeatherStationApp {
    /// Wire up a fresh deployment.
    ///
    /// Must be called inside a Tokio runtime: the dispatcher spawns its workers
    /// on subscription.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Bus`] if the observer cannot subscribe, or
    /// [`AppError::Command`] if command routing cannot be registered.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let events = InMemoryEventStore::new();
        let bus = Arc::new(EventDispatcher::new(config.dispatcher()));

        let logger = Arc::new(EventLogger::new());
        bus.subscribe(EventMatcher::Any, Arc::clone(&logger) as Arc<dyn EventHandler>)?;
        spawn_error_logger(&bus);

        let runtime = Arc::new(AggregateRuntime::<WeatherStation>::new(
            Arc::new(events.clone()),
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::new(SystemClock),
            config.runtime(),
        ));
        let commands = CommandBus::new();
        commands.register(Arc::clone(&runtime) as Arc<dyn CommandHandler>)?;

        tracing::info!(
            lanes = config.dispatch_lanes,
            poll_attempts = config.poll_attempts,
            "Weather station application started"
        );
        Ok(Self {
            config,
            events,
            bus,
            commands,
            runtime,
            logger,
            projection: None,
        })
    }

    /// Register station `id` under `name`.
    ///
    /// # Errors
    ///
    /// [`AppError::Command`] wrapping `AlreadyCreated` or `EmptyName`, or an
    /// infrastructure failure.
    pub async fn create(&self, ctx: &Context, id: &AggregateId, name: &str) -> Result<CommandOutcome, AppError> {
        self.send(ctx, id, StationCommand::Create { name: name.to_string() }).await
    }

    /// Report a temperature for station `id`.
    ///
    /// # Errors
    ///
    /// [`AppError::Command`] wrapping `InvalidTemperature`, or an
    /// infrastructure failure.
    pub async fn report_temperature(
        &self,
        ctx: &Context,
        id: &AggregateId,
        temperature: f64,
    ) -> Result<CommandOutcome, AppError> {
        self.send(ctx, id, StationCommand::ReportTemperature { temperature }).await
    }

    /// Rebuild station `id` from the event log.
    ///
    /// # Errors
    ///
    /// [`AppError::Restore`], e.g. not found for an unknown station.
    pub async fn restore(&self, ctx: &Context, id: &AggregateId) -> Result<AggregateRoot<WeatherStation>, AppError> {
        Ok(self.runtime.restorer().restore(ctx, id).await?)
    }

    /// Attach the temperature projection to the event bus.
    ///
    /// Only events published from now on are delivered; use
    /// [`catch_up`](Self::catch_up) for stations that already have history.
    /// Adding a second projector is a no-op.
    ///
    /// # Errors
    ///
    /// [`AppError::Bus`] if the subscription fails.
    pub fn add_projector(&mut self) -> Result<(), AppError> {
        if self.projection.is_some() {
            return Ok(());
        }
        let models = InMemoryReadModelStore::new();
        let engine = Arc::new(ProjectionEngine::new(
            TemperatureReadProjector,
            Arc::new(models.clone()),
            Arc::new(self.events.clone()),
        ));
        let subscription = ProjectionHandler::subscribe(Arc::clone(&engine), self.bus.as_ref())?;
        let reads = engine.read_side(self.config.visibility());
        self.projection = Some(Projection {
            engine,
            models,
            reads,
            subscription,
        });
        Ok(())
    }

    /// Bring the projection of station `id` up to date with the event log.
    ///
    /// # Errors
    ///
    /// [`AppError::NoProjector`] before [`add_projector`](Self::add_projector),
    /// otherwise [`AppError::Projection`].
    pub async fn catch_up(&self, ctx: &Context, id: &AggregateId) -> Result<Option<Temperature>, AppError> {
        Ok(self.projection()?.engine.catch_up(ctx, id).await?)
    }

    /// Wait for the projection of station `id` to reach `min_version`.
    ///
    /// # Errors
    ///
    /// [`AppError::NoProjector`] before [`add_projector`](Self::add_projector),
    /// otherwise [`AppError::Projection`].
    pub async fn temperature(
        &self,
        ctx: &Context,
        id: &AggregateId,
        min_version: Version,
    ) -> Result<Visibility<Temperature>, AppError> {
        Ok(self.projection()?.reads.await_entity(ctx, id, min_version).await?)
    }

    /// Every station's temperature history, waiting briefly for at least one.
    ///
    /// An empty list means no station became visible within the polling budget.
    ///
    /// # Errors
    ///
    /// [`AppError::NoProjector`] before [`add_projector`](Self::add_projector),
    /// otherwise [`AppError::Projection`].
    pub async fn list_temperature_history(&self, ctx: &Context) -> Result<Vec<Temperature>, AppError> {
        let stations = self.projection()?.reads.await_all(ctx, 1).await?;
        for station in &stations {
            tracing::info!(
                station = %station.id,
                name = %station.name,
                temperature = station.temperature,
                history = ?station.history,
                "Temperature history"
            );
        }
        Ok(stations)
    }

    /// Erase the event log and, if attached, the read models.
    ///
    /// # Errors
    ///
    /// [`AppError::Store`] or [`AppError::ReadModel`].
    pub async fn clear(&self) -> Result<(), AppError> {
        self.events.clear().await?;
        if let Some(projection) = &self.projection {
            projection.models.clear().await?;
        }
        tracing::info!("Event log and read models cleared");
        Ok(())
    }

    /// Number of events the observer has logged.
    #[must_use]
    pub fn logged_events(&self) -> usize {
        self.logger.seen()
    }

    /// The event log.
    #[must_use]
    pub const fn events(&self) -> &InMemoryEventStore {
        &self.events
    }

    /// Drain outstanding deliveries and stop the dispatcher.
    pub async fn shutdown(self) {
        if let Some(projection) = &self.projection {
            self.bus.unsubscribe(projection.subscription);
        }
        self.bus.shutdown().await;
        tracing::info!("Weather station application stopped");
    }

    async fn send(&self, ctx: &Context, id: &AggregateId, command: StationCommand) -> Result<CommandOutcome, AppError> {
        let envelope = command.to_envelope(StreamId::new(WeatherStation::AGGREGATE_TYPE, id.clone()))?;
        Ok(self.commands.dispatch(ctx, envelope).await?)
    }

    fn projection(&self) -> Result<&Projection, AppError> {
        self.projection.as_ref().ok_or(AppError::NoProjector)
    }
}

/// Log asynchronous delivery failures until the bus closes.
fn spawn_error_logger(bus: &EventDispatcher) {
    let mut errors = bus.errors();
    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(error) => tracing::warn!(%error, "Event delivery failed"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Delivery error stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
