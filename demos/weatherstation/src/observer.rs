//! Observer that logs every committed event.

use foldline_core::context::Context;
use foldline_core::event::RecordedEvent;
use foldline_core::event_bus::{EventHandler, HandlerError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Logs each delivered event at `info`.
///
/// Subscribe it with `EventMatcher::Any` to trace the whole event flow.
#[derive(Debug, Default)]
pub struct EventLogger {
    seen: AtomicUsize,
}

impl EventLogger {
    /// A logger that has seen nothing yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seen: AtomicUsize::new(0),
        }
    }

    /// Number of events logged so far.
    #[must_use]
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::Acquire)
    }
}

impl EventHandler for EventLogger {
    fn name(&self) -> &str {
        "EventLogger"
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a Context,
        event: &'a RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                stream_id = %event.stream_id,
                version = %event.version,
                event_type = event.event_type(),
                recorded_at = %event.recorded_at,
                "Event"
            );
            self.seen.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StationEvent;
    use foldline_core::stream::StreamId;
    use foldline_testing::recorded;

    #[tokio::test]
    async fn counts_logged_events() {
        let logger = EventLogger::new();
        let event = recorded(
            &StreamId::new("WeatherStation", "s-1"),
            1,
            &StationEvent::TemperatureReported { temperature: 1.0 },
        );

        logger.handle(&Context::new(), &event).await.unwrap();
        logger.handle(&Context::new(), &event).await.unwrap();

        assert_eq!(logger.seen(), 2);
        assert_eq!(logger.name(), "EventLogger");
    }
}
