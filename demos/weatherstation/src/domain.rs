//! Weather station aggregate: commands, events and validation.

use foldline_core::aggregate::Aggregate;
use foldline_core::command::Command;
use foldline_core::event::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A weather station, rebuilt from its event history.
///
/// A station exists once it has recorded any event. Reporting a temperature
/// to a fresh station brings it into existence without a name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherStation {
    /// Whether any event has been recorded.
    pub created: bool,
    /// Location name given at creation.
    pub name: Option<String>,
    /// Latest reported temperature.
    pub temperature: Option<f64>,
}

/// Commands accepted by a [`WeatherStation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StationCommand {
    /// Register the station under a location name.
    Create {
        /// Location name, e.g. `"Athens"`.
        name: String,
    },
    /// Record a temperature reading.
    ReportTemperature {
        /// Reading in degrees Celsius.
        temperature: f64,
    },
}

impl Command for StationCommand {
    const COMMAND_TYPES: &'static [&'static str] = &["CreateWeatherStation", "ReportTemperature"];

    fn command_type(&self) -> &'static str {
        match self {
            Self::Create { .. } => "CreateWeatherStation",
            Self::ReportTemperature { .. } => "ReportTemperature",
        }
    }
}

/// Facts recorded by a [`WeatherStation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StationEvent {
    /// The station was registered.
    WeatherStationCreated {
        /// Location name.
        name: String,
    },
    /// A temperature was reported.
    TemperatureReported {
        /// Reading in degrees Celsius.
        temperature: f64,
    },
}

impl Event for StationEvent {
    const EVENT_TYPES: &'static [&'static str] = &["WeatherStationCreated", "TemperatureReported"];

    fn event_type(&self) -> &'static str {
        match self {
            Self::WeatherStationCreated { .. } => "WeatherStationCreated",
            Self::TemperatureReported { .. } => "TemperatureReported",
        }
    }
}

/// Why a station rejected a command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StationError {
    /// `Create` was sent to a station that already exists.
    #[error("weather station already exists")]
    AlreadyCreated,

    /// `Create` carried a blank name.
    #[error("weather station name must not be empty")]
    EmptyName,

    /// The reading is NaN or infinite.
    #[error("invalid temperature reading: {0}")]
    InvalidTemperature(f64),
}

impl Aggregate for WeatherStation {
    const AGGREGATE_TYPE: &'static str = "WeatherStation";
    type Command = StationCommand;
    type Event = StationEvent;
    type Error = StationError;

    fn handle(&self, command: &StationCommand) -> Result<Vec<StationEvent>, StationError> {
        match command {
            StationCommand::Create { .. } if self.created => Err(StationError::AlreadyCreated),
            StationCommand::Create { name } if name.trim().is_empty() => Err(StationError::EmptyName),
            StationCommand::Create { name } => Ok(vec![StationEvent::WeatherStationCreated {
                name: name.trim().to_string(),
            }]),
            StationCommand::ReportTemperature { temperature } if !temperature.is_finite() => {
                Err(StationError::InvalidTemperature(*temperature))
            }
            StationCommand::ReportTemperature { temperature } => {
                Ok(vec![StationEvent::TemperatureReported {
                    temperature: *temperature,
                }])
            }
        }
    }

    fn apply(&mut self, event: &StationEvent) {
        self.created = true;
        match event {
            StationEvent::WeatherStationCreated { name } => self.name = Some(name.clone()),
            StationEvent::TemperatureReported { temperature } => self.temperature = Some(*temperature),
        }
    }
}
