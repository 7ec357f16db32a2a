//! Runtime configuration.
//!
//! Plain structs with documented defaults and `with_*` builders. Applications
//! usually start from `Default::default()` and override a few fields.
//!
//! # Example
//!
//! ```rust
//! use foldline_runtime::config::{DispatcherConfig, RuntimeConfig};
//! use std::time::Duration;
//!
//! let runtime = RuntimeConfig::default().with_conflict_retries(5);
//! let dispatcher = DispatcherConfig::default()
//!     .with_lanes(8)
//!     .with_handler_timeout(Duration::from_secs(2));
//! ```

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Configuration for the aggregate runtime and restore coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Backoff for event log calls that fail with `Unavailable`.
    pub store_retry: RetryPolicy,
    /// How many times a command is reloaded and re-run after a
    /// concurrency conflict before the conflict is surfaced.
    pub conflict_retries: usize,
}

impl RuntimeConfig {
    /// Set the event log retry policy
    #[must_use]
    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    /// Set the number of conflict retries
    #[must_use]
    pub const fn with_conflict_retries(mut self, retries: usize) -> Self {
        self.conflict_retries = retries;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_retry: RetryPolicy::default(),
            conflict_retries: 3,
        }
    }
}

/// Configuration for the in-process event dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Workers per subscription. Events of one stream always use the same lane.
    pub lanes: usize,
    /// Bounded queue size per lane. Events that find a lane full are not
    /// queued for that subscription and are reported on the error stream.
    pub queue_capacity: usize,
    /// Upper bound for a single delivery attempt.
    pub handler_timeout: Duration,
    /// Backoff between delivery attempts of one event to one handler.
    pub delivery_retry: RetryPolicy,
    /// Capacity of the error broadcast channel.
    pub error_capacity: usize,
}

impl DispatcherConfig {
    /// Set the number of lanes per subscription (at least one)
    #[must_use]
    pub const fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = if lanes == 0 { 1 } else { lanes };
        self
    }

    /// Set the per-lane queue capacity (at least one)
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Set the per-attempt handler timeout
    #[must_use]
    pub const fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Set the delivery retry policy
    #[must_use]
    pub fn with_delivery_retry(mut self, policy: RetryPolicy) -> Self {
        self.delivery_retry = policy;
        self
    }

    /// Set the error channel capacity (at least one)
    #[must_use]
    pub const fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            queue_capacity: 1024,
            handler_timeout: Duration::from_secs(5),
            delivery_retry: RetryPolicy::builder()
                .max_retries(5)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(5))
                .jitter(0.2)
                .build(),
            error_capacity: 256,
        }
    }
}
