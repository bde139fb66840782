//! Error types for the storage crate.

use thiserror::Error;

use iotagent_core::{DeviceKey, EntityKey};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Device key already taken.
    #[error("Duplicate device: {0}")]
    Duplicate(DeviceKey),

    /// Entity key already owned by another device.
    #[error("Entity conflict: {0}")]
    EntityConflict(EntityKey),
}

impl From<Error> for iotagent_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => iotagent_core::Error::Io(e),
            Error::Serialization(s) => iotagent_core::Error::Serialization(s),
            Error::Storage(s) => iotagent_core::Error::Storage(s),
            Error::Duplicate(key) => iotagent_core::Error::DuplicateDevice(key),
            Error::EntityConflict(key) => iotagent_core::Error::EntityConflict(key),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(format!("Redb error: {}", e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(format!("Redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(format!("Redb table error: {}", e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(format!("Redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(format!("Redb commit error: {}", e))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(format!("Redb database error: {}", e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Storage(format!("Task join error: {}", e))
    }
}
