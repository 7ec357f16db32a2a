//! # Weather Station
//!
//! Reference domain for Foldline: a weather station that can be created under
//! a location name and receives temperature reports, with a
//! [`TemperatureReadProjector`] maintaining each station's reading history.
//!
//! [`WeatherStationApp`] wires the pieces together over in-memory storage:
//!
//! ```no_run
//! use foldline_core::context::Context;
//! use foldline_core::stream::{AggregateId, Version};
//! use weatherstation::{Config, WeatherStationApp};
//!
//! # async fn example() -> Result<(), weatherstation::AppError> {
//! let mut app = WeatherStationApp::new(Config::default())?;
//! app.add_projector()?;
//!
//! let ctx = Context::new();
//! let id = AggregateId::generate();
//! app.create(&ctx, &id, "Athens").await?;
//! app.report_temperature(&ctx, &id, 21.5).await?;
//!
//! let view = app.temperature(&ctx, &id, Version::new(2)).await?;
//! assert!(view.is_visible());
//! app.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod observer;
pub mod projector;

pub use app::{AppError, WeatherStationApp};
pub use config::Config;
pub use domain::{StationCommand, StationError, StationEvent, WeatherStation};
pub use observer::EventLogger;
pub use projector::{Temperature, TemperatureReadProjector};
