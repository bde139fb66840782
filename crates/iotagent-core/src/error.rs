//! Error types shared across the agent.

use thiserror::Error;

use crate::device::{DeviceKey, EntityKey};

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Agent error taxonomy.
///
/// Every variant is returned to the caller as structured data; the transport
/// layer maps it to a protocol response.
#[derive(Debug, Error)]
pub enum Error {
    /// A device with the same id already exists in the scope.
    #[error("Duplicate device id: {0}")]
    DuplicateDevice(DeviceKey),

    /// Another device in the scope already owns this entity.
    #[error("Entity already registered by another device: {0}")]
    EntityConflict(EntityKey),

    /// Device or entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// North-bound registration, deregistration or update failed.
    #[error("Context broker error: {0}")]
    Registration(String),

    /// Result reported for a command the device does not declare.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Result reported with a status other than FINISHED or ERROR.
    #[error("Invalid command status: {0}")]
    InvalidStatus(String),

    /// An externally supplied handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn device_not_found(key: &DeviceKey) -> Self {
        Error::NotFound(format!("device {}", key))
    }

    pub fn entity_not_found(key: &EntityKey) -> Self {
        Error::NotFound(format!("entity {}", key))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
