//! In-process event dispatcher.
//!
//! [`EventDispatcher`] implements [`EventBus`] with one worker pool per
//! subscription:
//!
//! ```text
//!                    ┌──────── lane 0 ──► worker ──┐
//! publish ─► match ─►├──────── lane 1 ──► worker ──┼──► handler
//!                    └──────── lane N ──► worker ──┘
//! ```
//!
//! An event goes to lane `hash(stream) % N`, so events of one stream reach
//! the handler in publish order while different streams run in parallel.
//!
//! Lanes are bounded queues and `publish` never waits on them. When a lane
//! is full, or its worker has stopped, only that subscription misses the
//! event: a [`DispatchError`] carrying [`HandlerError::QueueFull`] or
//! [`HandlerError::Disconnected`] is broadcast and every other subscription
//! still receives it. A stalled handler cannot hold up other handlers or
//! the command path that publishes.
//!
//! Every delivery attempt is bounded by the handler timeout. Retryable
//! failures are retried with backoff; once retries are exhausted (or the
//! failure is permanent) a [`DispatchError`] is broadcast on [`errors`] and
//! the worker moves on. A failing handler never affects other subscriptions.
//!
//! [`errors`]: EventBus::errors

use crate::config::DispatcherConfig;
use crate::metrics::DispatchMetrics;
use crate::retry::retry_with_predicate;
use foldline_core::context::Context;
use foldline_core::event::RecordedEvent;
use foldline_core::event_bus::{
    DispatchError, EventBus, EventBusError, EventHandler, EventMatcher, HandlerError, SubscriptionId,
};
use foldline_core::stream::StreamId;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

struct Delivery {
    ctx: Context,
    event: Arc<RecordedEvent>,
}

struct Subscription {
    id: SubscriptionId,
    matcher: EventMatcher,
    handler_name: String,
    lanes: Vec<mpsc::Sender<Delivery>>,
}

impl Subscription {
    fn lane_for(&self, stream_id: &StreamId) -> &mpsc::Sender<Delivery> {
        let mut hasher = DefaultHasher::new();
        stream_id.hash(&mut hasher);
        let lanes = self.lanes.len() as u64;
        // `lanes` is at least one, so the index always fits.
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % lanes) as usize;
        &self.lanes[index]
    }
}

/// In-process, at-least-once event bus.
///
/// Delivery is at least once for every subscription that keeps up; an event
/// a subscription misses because its lane was full is reported on
/// [`errors`](EventBus::errors) instead.
///
/// Cheap to clone; clones share the same subscriptions.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: DispatcherConfig,
    subscriptions: RwLock<Vec<Subscription>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    errors: broadcast::Sender<DispatchError>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// A dispatcher with the given configuration and no subscriptions.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let (errors, _) = broadcast::channel(config.error_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                subscriptions: RwLock::new(Vec::new()),
                workers: Mutex::new(Vec::new()),
                errors,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove a subscription. Events already queued for it are still delivered.
    ///
    /// Returns `false` if the subscription does not exist.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        let removed = subscriptions.len() != before;
        if removed {
            tracing::info!(subscription = id.0, "Subscription removed");
        }
        removed
    }

    /// Stop accepting events, let every worker drain its queue, and wait for
    /// the workers to finish.
    ///
    /// Calling `shutdown` twice is harmless.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down event dispatcher");

        // Dropping the senders closes the lanes; workers exit once drained.
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let workers: Vec<_> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = workers.len();
        for worker in workers {
            if let Err(error) = worker.await {
                tracing::error!(%error, "Dispatcher worker panicked");
            }
        }
        tracing::info!(workers = count, "Event dispatcher stopped");
    }

    /// Queue `delivery` without waiting. A full or stopped lane costs only
    /// this subscription the event, and is reported on the error stream.
    fn enqueue(&self, handler: &str, lane: &mpsc::Sender<Delivery>, delivery: Delivery) {
        let (error, delivery) = match lane.try_send(delivery) {
            Ok(()) => return,
            Err(TrySendError::Full(delivery)) => (HandlerError::QueueFull, delivery),
            Err(TrySendError::Closed(delivery)) => (HandlerError::Disconnected, delivery),
        };
        tracing::warn!(
            handler,
            event = %delivery.event,
            %error,
            "Event not queued for handler"
        );
        report(&self.inner.errors, handler, &delivery.event, 0, error);
    }

    fn targets(&self, event: &RecordedEvent) -> Vec<(String, mpsc::Sender<Delivery>)> {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|subscription| subscription.matcher.matches(event))
            .map(|subscription| {
                (
                    subscription.handler_name.clone(),
                    subscription.lane_for(&event.stream_id).clone(),
                )
            })
            .collect()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl EventBus for EventDispatcher {
    fn publish<'a>(
        &'a self,
        ctx: &'a Context,
        events: &'a [RecordedEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(EventBusError::Closed);
            }

            // Deliveries outlive the publishing request.
            let delivery_ctx = ctx.detached();

            for event in events {
                let event = Arc::new(event.clone());
                for (handler, lane) in self.targets(&event) {
                    tracing::debug!(handler = %handler, event = %event, "Queueing event");
                    let delivery = Delivery {
                        ctx: delivery_ctx.clone(),
                        event: Arc::clone(&event),
                    };
                    self.enqueue(&handler, &lane, delivery);
                }
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, EventBusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            EventBusError::SubscriptionFailed {
                handler: handler.name().to_string(),
                reason: e.to_string(),
            }
        })?;

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let config = &self.inner.config;
        let lane_count = config.lanes.max(1);

        let mut lanes = Vec::with_capacity(lane_count);
        let mut workers = Vec::with_capacity(lane_count);
        for lane in 0..lane_count {
            let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
            lanes.push(sender);
            workers.push(runtime.spawn(run_lane(
                Arc::clone(&handler),
                receiver,
                config.clone(),
                self.inner.errors.clone(),
                lane,
            )));
        }

        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(workers);
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                matcher: matcher.clone(),
                handler_name: handler.name().to_string(),
                lanes,
            });

        tracing::info!(
            subscription = id.0,
            handler = handler.name(),
            ?matcher,
            lanes = lane_count,
            "Handler subscribed"
        );
        Ok(id)
    }

    fn errors(&self) -> broadcast::Receiver<DispatchError> {
        self.inner.errors.subscribe()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("config", &self.inner.config)
            .field("subscriptions", &self.subscription_count())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

async fn run_lane(
    handler: Arc<dyn EventHandler>,
    mut receiver: mpsc::Receiver<Delivery>,
    config: DispatcherConfig,
    errors: broadcast::Sender<DispatchError>,
    lane: usize,
) {
    tracing::debug!(handler = handler.name(), lane, "Dispatcher lane started");
    while let Some(delivery) = receiver.recv().await {
        deliver(handler.as_ref(), &delivery, &config, &errors).await;
    }
    tracing::debug!(handler = handler.name(), lane, "Dispatcher lane drained");
}

async fn deliver(
    handler: &dyn EventHandler,
    delivery: &Delivery,
    config: &DispatcherConfig,
    errors: &broadcast::Sender<DispatchError>,
) {
    let ctx = &delivery.ctx;
    let event = delivery.event.as_ref();
    let timeout = config.handler_timeout;
    let mut attempts = 0;

    let result = retry_with_predicate(
        &config.delivery_retry,
        || {
            attempts += 1;
            async move {
                tokio::time::timeout(timeout, handler.handle(ctx, event))
                    .await
                    .unwrap_or(Err(HandlerError::Timeout))
            }
        },
        HandlerError::is_retryable,
    )
    .await;

    match result {
        Ok(()) => DispatchMetrics::record_delivery(),
        Err(error) => {
            tracing::error!(
                handler = handler.name(),
                event = %event,
                attempts,
                %error,
                "Giving up on delivery"
            );
            report(errors, handler.name(), event, attempts, error);
        }
    }
}

fn report(
    errors: &broadcast::Sender<DispatchError>,
    handler: &str,
    event: &RecordedEvent,
    attempts: usize,
    error: HandlerError,
) {
    DispatchMetrics::record_failure();
    // No receiver is fine: the error stream is diagnostic only.
    errors
        .send(DispatchError {
            handler: handler.to_string(),
            stream_id: event.stream_id.clone(),
            version: event.version,
            event_type: event.event_type().to_string(),
            attempts,
            error,
        })
        .ok();
}
