//! Commands and the type-erased command envelope.
//!
//! A command is an intent addressed to one aggregate instance. Commands are
//! consumed once and never persisted. Domain code models them as an enum
//! implementing [`Command`]; routing layers that do not know the concrete type
//! move them around as a [`CommandEnvelope`].

use crate::stream::StreamId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Errors converting a command to or from its envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandCodecError {
    /// Failed to serialize the command payload.
    #[error("Failed to serialize command {command_type}: {reason}")]
    Serialization {
        /// Command type being encoded.
        command_type: String,
        /// Encoder message.
        reason: String,
    },

    /// The payload does not decode into the expected command enum.
    #[error("Failed to deserialize command {command_type}: {reason}")]
    Deserialization {
        /// Command type being decoded.
        command_type: String,
        /// Decoder message.
        reason: String,
    },
}

/// A domain command enum.
pub trait Command: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Every type tag this command enum can produce.
    const COMMAND_TYPES: &'static [&'static str];

    /// Stable type tag of this command.
    fn command_type(&self) -> &'static str;

    /// Wrap the command into an envelope addressed to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandCodecError::Serialization`] if the payload cannot be encoded.
    fn to_envelope(&self, target: StreamId) -> Result<CommandEnvelope, CommandCodecError> {
        let payload = bincode::serialize(self).map_err(|e| CommandCodecError::Serialization {
            command_type: self.command_type().to_string(),
            reason: e.to_string(),
        })?;
        Ok(CommandEnvelope {
            command_type: self.command_type().to_string(),
            target,
            payload,
        })
    }

    /// Decode a command from an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CommandCodecError::Deserialization`] if the payload does not
    /// decode, or decodes into a variant whose type differs from the envelope's.
    fn from_envelope(envelope: &CommandEnvelope) -> Result<Self, CommandCodecError> {
        let command: Self = bincode::deserialize(&envelope.payload).map_err(|e| {
            CommandCodecError::Deserialization {
                command_type: envelope.command_type.clone(),
                reason: e.to_string(),
            }
        })?;
        if command.command_type() != envelope.command_type {
            return Err(CommandCodecError::Deserialization {
                command_type: envelope.command_type.clone(),
                reason: format!("payload encodes {}", command.command_type()),
            });
        }
        Ok(command)
    }
}

/// A type-erased command addressed to one aggregate instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command type tag, used for routing.
    pub command_type: String,
    /// Target aggregate stream.
    pub target: StreamId,
    /// bincode-encoded command enum.
    pub payload: Vec<u8>,
}

impl fmt::Display for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.command_type, self.target)
    }
}
