//! # Foldline Core
//!
//! Core traits and types for the Foldline event-sourcing engine.
//!
//! This crate defines the shared data model and the contracts between the
//! engine's components. It performs no I/O of its own.
//!
//! ## Core Concepts
//!
//! - **Aggregate**: Domain state derived purely from its ordered event history
//! - **Command**: An intent addressed to one aggregate, validated by [`aggregate::Aggregate::handle`]
//! - **Event**: An immutable fact with a per-stream sequence number
//! - **Read Model**: A versioned, query-optimized view folded from events by a [`projection::Projector`]
//! - **Context**: Cancellation, deadline and correlation metadata for every operation
//!
//! ## External Collaborators
//!
//! - [`event_store::EventStore`]: durable, append-only event log with optimistic concurrency
//! - [`event_bus::EventBus`]: at-least-once fan-out of committed events
//! - [`projection::ReadModelStore`]: storage for read-model entities
//!
//! ## Example
//!
//! ```ignore
//! use foldline_core::aggregate::Aggregate;
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct WeatherStation {
//!     created: bool,
//!     temperature: Option<f64>,
//! }
//!
//! impl Aggregate for WeatherStation {
//!     const AGGREGATE_TYPE: &'static str = "WeatherStation";
//!     type Command = StationCommand;
//!     type Event = StationEvent;
//!     type Error = StationError;
//!
//!     fn handle(&self, command: &StationCommand) -> Result<Vec<StationEvent>, StationError> {
//!         // Validate against current state, decide events
//!         Ok(vec![])
//!     }
//!
//!     fn apply(&mut self, event: &StationEvent) {
//!         // Pure fold
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod command;
pub mod context;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod projection;
pub mod stream;

/// Environment module - Dependency injection traits
///
/// External dependencies the engine needs at runtime are abstracted behind
/// traits and injected at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The aggregate runtime stamps every recorded event with `now()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use foldline_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
