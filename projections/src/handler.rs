//! Event-bus adapter for a projection engine.

use crate::engine::ProjectionEngine;
use crate::error::ProjectionError;
use foldline_core::context::Context;
use foldline_core::event::RecordedEvent;
use foldline_core::event_bus::{
    EventBus, EventBusError, EventHandler, EventMatcher, HandlerError, SubscriptionId,
};
use foldline_core::projection::Projector;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Feeds delivered events into a [`ProjectionEngine`].
///
/// Retryable projection errors (gaps, unavailable stores) are reported as
/// [`HandlerError::Transient`] so the dispatcher redelivers with backoff.
pub struct ProjectionHandler<P: Projector> {
    engine: Arc<ProjectionEngine<P>>,
}

impl<P: Projector> ProjectionHandler<P> {
    /// Wrap `engine`.
    #[must_use]
    pub const fn new(engine: Arc<ProjectionEngine<P>>) -> Self {
        Self { engine }
    }

    /// The events this handler wants: every stream of the projector's aggregate type.
    #[must_use]
    pub fn matcher() -> EventMatcher {
        EventMatcher::aggregate_types([P::AGGREGATE_TYPE])
    }

    /// Subscribe `engine` to `bus`.
    ///
    /// # Errors
    ///
    /// Propagates the bus's [`EventBusError`].
    pub fn subscribe(engine: Arc<ProjectionEngine<P>>, bus: &dyn EventBus) -> Result<SubscriptionId, EventBusError> {
        let id = bus.subscribe(Self::matcher(), Arc::new(Self::new(engine)))?;
        tracing::info!(projector = P::PROJECTOR_TYPE, subscription = id.0, "Projection subscribed");
        Ok(id)
    }
}

impl<P: Projector> EventHandler for ProjectionHandler<P> {
    fn name(&self) -> &str {
        P::PROJECTOR_TYPE
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a Context,
        event: &'a RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            self.engine
                .handle(ctx, event)
                .await
                .map(|_| ())
                .map_err(to_handler_error)
        })
    }
}

fn to_handler_error(error: ProjectionError) -> HandlerError {
    if error.is_retryable() {
        HandlerError::Transient(error.to_string())
    } else {
        HandlerError::Permanent(error.to_string())
    }
}
