//! Weather Station - Runnable Demo
//!
//! Walks through the full lifecycle:
//! - Creating a station and reporting temperatures
//! - Restoring the station from its event history
//! - Attaching the temperature projection late and catching it up
//! - Reading the projected history

use anyhow::Result;
use foldline_core::context::Context;
use foldline_core::stream::AggregateId;
use foldline_projections::Visibility;
use foldline_runtime::metrics::MetricsServer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weatherstation::{Config, WeatherStationApp};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env();
    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start()?;
    }
    let location = config.location.clone();
    let mut app = WeatherStationApp::new(config)?;
    let ctx = Context::new().with_actor("weatherstation-demo");

    info!("🌤  Weather Station Example");

    let id = AggregateId::generate();
    app.create(&ctx, &id, &location).await?;
    info!(station = %id, location = %location, "Station created");

    for temperature in [1.0, 2.0, 3.0] {
        let outcome = app.report_temperature(&ctx, &id, temperature).await?;
        info!(version = %outcome.version, temperature, "Temperature reported");
    }

    let station = app.restore(&ctx, &id).await?;
    info!(
        version = %station.version(),
        name = ?station.state().name,
        temperature = ?station.state().temperature,
        "Station restored from event log"
    );

    // Attached after the first reports: only catch-up can see them.
    app.add_projector()?;
    if let Some(view) = app.catch_up(&ctx, &id).await? {
        info!(version = %view.version, history = ?view.history, "Projection caught up");
    }

    let outcome = app.report_temperature(&ctx, &id, 4.0).await?;
    match app.temperature(&ctx, &id, outcome.version).await? {
        Visibility::Visible(view) => {
            info!(version = %view.version, temperature = view.temperature, "Projection is current");
        }
        Visibility::NotYetVisible { observed } => {
            info!(?observed, expected = %outcome.version, "Projection still behind");
        }
        Visibility::Absent => info!("Station has no events"),
    }

    let stations = app.list_temperature_history(&ctx).await?;
    info!(stations = stations.len(), "✅ Done");

    app.shutdown().await;
    if let Some(text) = metrics.as_ref().and_then(MetricsServer::render) {
        println!("{text}");
    }
    Ok(())
}
