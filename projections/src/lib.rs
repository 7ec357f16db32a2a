//! Version-gated projections for Foldline.
//!
//! # Overview
//!
//! This crate builds the query side from the event stream:
//! - **[`ProjectionEngine`]**: gates each event against the entity's version,
//!   folds it with a [`Projector`](foldline_core::projection::Projector) and
//!   writes the result to the read-model store
//! - **[`ProjectionHandler`]**: subscribes an engine to the event bus
//! - **[`ReadSide`]**: bounded polling for callers waiting on eventual consistency
//!
//! # Delivery
//!
//! ```text
//! Event Log  →  Event Bus  →  ProjectionHandler  →  ProjectionEngine  →  ReadModelStore
//!     ▲                                                    │
//!     └──────────────── replay missing range ──────────────┘
//! ```
//!
//! The bus delivers at least once and in order per stream. Duplicates are
//! dropped by the version gate; gaps are filled from the event log.
//!
//! # Example
//!
//! ```ignore
//! use foldline_projections::{ProjectionEngine, ProjectionHandler, VisibilityConfig};
//!
//! let engine = Arc::new(ProjectionEngine::new(TemperatureReadProjector, read_models, event_log));
//! ProjectionHandler::subscribe(Arc::clone(&engine), bus.as_ref())?;
//!
//! // Projection created after events exist
//! engine.catch_up(&ctx, &station_id).await?;
//!
//! let reads = engine.read_side(VisibilityConfig::default());
//! let visibility = reads.await_entity(&ctx, &station_id, Version::new(4)).await?;
//! ```

pub mod engine;
pub mod error;
pub mod handler;
pub mod visibility;

pub use engine::{Handled, ProjectOutcome, ProjectionEngine};
pub use error::ProjectionError;
pub use handler::ProjectionHandler;
pub use visibility::{ReadSide, Visibility, VisibilityConfig};
