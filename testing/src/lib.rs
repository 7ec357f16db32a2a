//! # Foldline Testing
//!
//! Testing utilities and in-memory collaborators for the Foldline engine.
//!
//! This crate provides:
//! - [`InMemoryEventStore`]: event log with optimistic concurrency and fault injection
//! - [`InMemoryReadModelStore`]: read-model store with fault injection
//! - [`RecordingHandler`]: event bus subscriber that records deliveries
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//! - [`AggregateTest`] and [`ProjectionTestHarness`]: Given-When-Then helpers
//!
//! ## Example
//!
//! ```ignore
//! use foldline_testing::{AggregateTest, history};
//!
//! #[test]
//! fn report_after_create() {
//!     AggregateTest::<WeatherStation>::new()
//!         .given(vec![StationEvent::WeatherStationCreated { name: "Athens".into() }])
//!         .when(StationCommand::ReportTemperature { temperature: 21.5 })
//!         .then_events(|events| assert_eq!(events.len(), 1))
//!         .run();
//! }
//! ```

use chrono::{DateTime, Utc};
use foldline_core::environment::Clock;

pub mod event_store;
pub mod fixtures;
pub mod handlers;
pub mod projection_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use foldline_testing::mocks::FixedClock;
    /// use foldline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is a valid constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call wins.
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

// Re-export commonly used items
pub use aggregate_test::AggregateTest;
pub use event_store::InMemoryEventStore;
pub use fixtures::{history, recorded};
pub use handlers::RecordingHandler;
pub use mocks::{FixedClock, test_clock};
pub use projection_mocks::{InMemoryReadModelStore, ProjectionTestHarness};
