//! Configuration for the weather-station application.
//!
//! Loads configuration from `WEATHERSTATION_*` environment variables, and a
//! `.env` file if one is present, with sensible defaults.

use foldline_projections::VisibilityConfig;
use foldline_runtime::config::{DispatcherConfig, RuntimeConfig};
use foldline_runtime::retry::RetryPolicy;
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Location name used by the demo binary.
    pub location: String,
    /// Store retries before a command or restore gives up.
    pub store_retries: usize,
    /// Concurrency-conflict retries per command.
    pub conflict_retries: usize,
    /// Dispatcher lanes per subscription.
    pub dispatch_lanes: usize,
    /// Per-attempt handler timeout.
    pub handler_timeout: Duration,
    /// Delivery retries before an event is dropped for a handler.
    pub delivery_retries: usize,
    /// Reads made while waiting for the projection.
    pub poll_attempts: usize,
    /// Delay between those reads.
    pub poll_interval: Duration,
    /// Install the Prometheus recorder, reporting this scrape address.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: "Athens".to_string(),
            store_retries: 3,
            conflict_retries: 3,
            dispatch_lanes: 4,
            handler_timeout: Duration::from_secs(5),
            delivery_retries: 5,
            poll_attempts: 10,
            poll_interval: Duration::from_millis(100),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory or its parents is loaded first;
    /// variables already set in the environment take precedence over it.
    /// Unset or unparsable variables fall back to [`Config::default`].
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WEATHERSTATION_LOCATION` | `Athens` |
    /// | `WEATHERSTATION_STORE_RETRIES` | 3 |
    /// | `WEATHERSTATION_CONFLICT_RETRIES` | 3 |
    /// | `WEATHERSTATION_DISPATCH_LANES` | 4 |
    /// | `WEATHERSTATION_HANDLER_TIMEOUT_MS` | 5000 |
    /// | `WEATHERSTATION_DELIVERY_RETRIES` | 5 |
    /// | `WEATHERSTATION_POLL_ATTEMPTS` | 10 |
    /// | `WEATHERSTATION_POLL_INTERVAL_MS` | 100 |
    /// | `WEATHERSTATION_METRICS_ADDR` | unset (no recorder) |
    #[must_use]
    pub fn from_env() -> Self {
        // No .env file is fine.
        dotenvy::dotenv().ok();
        Self::from_vars()
    }

    /// Load `path` as a `.env` file, then read configuration as
    /// [`from_env`](Self::from_env) does.
    ///
    /// # Errors
    ///
    /// Returns the [`dotenvy::Error`] if `path` cannot be read or parsed.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, dotenvy::Error> {
        dotenvy::from_path(path.as_ref())?;
        Ok(Self::from_vars())
    }

    fn from_vars() -> Self {
        let defaults = Self::default();
        Self {
            location: env::var("WEATHERSTATION_LOCATION")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.location),
            store_retries: parse_var("WEATHERSTATION_STORE_RETRIES").unwrap_or(defaults.store_retries),
            conflict_retries: parse_var("WEATHERSTATION_CONFLICT_RETRIES")
                .unwrap_or(defaults.conflict_retries),
            dispatch_lanes: parse_var("WEATHERSTATION_DISPATCH_LANES")
                .filter(|lanes| *lanes > 0)
                .unwrap_or(defaults.dispatch_lanes),
            handler_timeout: parse_var("WEATHERSTATION_HANDLER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.handler_timeout),
            delivery_retries: parse_var("WEATHERSTATION_DELIVERY_RETRIES")
                .unwrap_or(defaults.delivery_retries),
            poll_attempts: parse_var("WEATHERSTATION_POLL_ATTEMPTS")
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.poll_attempts),
            poll_interval: parse_var("WEATHERSTATION_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            metrics_addr: parse_var("WEATHERSTATION_METRICS_ADDR").or(defaults.metrics_addr),
        }
    }

    /// Command runtime settings.
    #[must_use]
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_store_retry(RetryPolicy::builder().max_retries(self.store_retries).build())
            .with_conflict_retries(self.conflict_retries)
    }

    /// Event dispatcher settings.
    #[must_use]
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_lanes(self.dispatch_lanes)
            .with_handler_timeout(self.handler_timeout)
            .with_delivery_retry(
                RetryPolicy::builder()
                    .max_retries(self.delivery_retries)
                    .initial_delay(Duration::from_millis(20))
                    .max_delay(Duration::from_secs(1))
                    .build(),
            )
    }

    /// Read-side polling settings.
    #[must_use]
    pub fn visibility(&self) -> VisibilityConfig {
        VisibilityConfig::new(RetryPolicy::fixed(
            self.poll_attempts.saturating_sub(1),
            self.poll_interval,
        ))
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
