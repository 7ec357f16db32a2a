//! Recording event bus subscriber.

use foldline_core::context::Context;
use foldline_core::event::RecordedEvent;
use foldline_core::event_bus::{EventHandler, HandlerError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// An [`EventHandler`] that records every event it accepts.
///
/// Can be told to fail the next N deliveries (transiently or permanently) or
/// to take a while per delivery, for exercising dispatcher retries and
/// timeouts. Failed deliveries are not recorded.
///
/// # Example
///
/// ```ignore
/// let handler = Arc::new(RecordingHandler::new("observer"));
/// bus.subscribe(EventMatcher::Any, handler.clone())?;
///
/// runtime.execute(&ctx, &id, command).await?;
/// assert!(handler.wait_for(1, Duration::from_secs(1)).await);
/// ```
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    events: Mutex<Vec<RecordedEvent>>,
    attempts: AtomicUsize,
    transient_failures: AtomicUsize,
    permanent_failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    notify: Notify,
}

impl RecordingHandler {
    /// A handler that accepts everything.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            permanent_failures: AtomicUsize::new(0),
            delay: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Convenience constructor returning an `Arc`.
    #[must_use]
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Fail the next `count` deliveries with [`HandlerError::Transient`].
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::Release);
    }

    /// Fail the next `count` deliveries with [`HandlerError::Permanent`].
    pub fn reject_next(&self, count: usize) {
        self.permanent_failures.store(count, Ordering::Release);
    }

    /// Sleep for `delay` at the start of every delivery.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Recorded events, in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of delivery attempts, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// Wait until at least `count` events are recorded.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a Context,
        event: &'a RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if Self::take(&self.permanent_failures) {
                return Err(HandlerError::Permanent(format!("rejected {event}")));
            }
            if Self::take(&self.transient_failures) {
                return Err(HandlerError::Transient(format!("failed {event}")));
            }

            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
            self.notify.notify_waiters();
            Ok(())
        })
    }
}
