//! # Foldline Runtime
//!
//! Write-side runtime for the Foldline event-sourcing engine.
//!
//! ## Core Components
//!
//! - **Aggregate Runtime**: Validates commands against restored state and appends the resulting events
//! - **Restore Coordinator**: Rebuilds aggregates by replaying their event history
//! - **Event Dispatcher**: At-least-once, per-stream ordered fan-out of committed events
//! - **Command Bus**: Explicit registry routing type-erased commands to their runtime
//!
//! ## Example
//!
//! ```ignore
//! use foldline_runtime::aggregate::AggregateRuntime;
//! use foldline_runtime::config::{DispatcherConfig, RuntimeConfig};
//! use foldline_runtime::dispatcher::EventDispatcher;
//!
//! let bus = Arc::new(EventDispatcher::new(DispatcherConfig::default()));
//! let runtime = AggregateRuntime::<WeatherStation>::new(
//!     store,
//!     bus,
//!     Arc::new(SystemClock),
//!     RuntimeConfig::default(),
//! );
//!
//! let outcome = runtime
//!     .execute(&Context::new(), &id, StationCommand::ReportTemperature { temperature: 21.5 })
//!     .await?;
//! ```

/// Aggregate runtime (command execution)
pub mod aggregate;

/// Explicit command registry
pub mod command_bus;

/// Runtime and dispatcher configuration
pub mod config;

/// In-process event dispatcher
pub mod dispatcher;

/// Command and restore errors
pub mod error;

/// Per-key async locks
pub mod locks;

/// Prometheus metrics for observability
pub mod metrics;

/// Restore coordinator and cache
pub mod restore;

/// Retry logic with exponential backoff
pub mod retry;

pub use aggregate::{AggregateRuntime, CommandOutcome};
pub use command_bus::{CommandBus, CommandHandler};
pub use config::{DispatcherConfig, RuntimeConfig};
pub use dispatcher::EventDispatcher;
pub use error::{CommandError, DynCommandError, RestoreError};
pub use restore::{RestoreCache, RestoreCoordinator};
pub use retry::RetryPolicy;
