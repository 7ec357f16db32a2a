//! Temperature history read model.

use crate::domain::{StationEvent, WeatherStation};
use foldline_core::aggregate::Aggregate;
use foldline_core::event::{Event, RecordedEvent};
use foldline_core::projection::{Projector, ProjectorError, ReadModel};
use foldline_core::stream::{AggregateId, Version};

/// A station's name, latest temperature and every reading so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Temperature {
    /// Station identity.
    pub id: AggregateId,
    /// Version of the last station event folded in.
    pub version: Version,
    /// Location name, empty until the station is created by name.
    pub name: String,
    /// Latest reading.
    pub temperature: f64,
    /// Readings in report order.
    pub history: Vec<f64>,
}

impl ReadModel for Temperature {
    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

/// Folds station events into [`Temperature`] entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemperatureReadProjector;

impl Projector for TemperatureReadProjector {
    const PROJECTOR_TYPE: &'static str = "TemperatureReadProjector";
    const AGGREGATE_TYPE: &'static str = WeatherStation::AGGREGATE_TYPE;
    type Event = StationEvent;
    type Entity = Temperature;

    fn new_entity(&self, id: &AggregateId) -> Temperature {
        Temperature {
            id: id.clone(),
            version: Version::INITIAL,
            name: String::new(),
            temperature: 0.0,
            history: Vec::new(),
        }
    }

    fn project(
        &self,
        event: &StationEvent,
        recorded: &RecordedEvent,
        mut entity: Temperature,
    ) -> Result<Temperature, ProjectorError> {
        if recorded.aggregate_id() != &entity.id {
            return Err(ProjectorError {
                projector: Self::PROJECTOR_TYPE.to_string(),
                event_type: recorded.event_type().to_string(),
                reason: format!("event for {} applied to {}", recorded.aggregate_id(), entity.id),
            });
        }

        match event {
            StationEvent::WeatherStationCreated { name } => {
                entity.name.clone_from(name);
                entity.history.clear();
            }
            StationEvent::TemperatureReported { temperature } => {
                entity.temperature = *temperature;
                entity.history.push(*temperature);
            }
        }
        tracing::debug!(
            station = %entity.id,
            event_type = event.event_type(),
            "Temperature read model updated"
        );
        Ok(entity)
    }
}
