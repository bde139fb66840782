//! Context broker errors.

use std::time::Duration;

use thiserror::Error;

/// Result type for broker calls.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Failure talking to the context broker.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Connection or protocol level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No answer within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The broker answered with an error code.
    #[error("Broker rejected request: {code} {reason}")]
    Rejected { code: String, reason: String },

    /// The broker answered with something that is not a valid response.
    #[error("Invalid broker response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::Rejected {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// True when the broker reports the target as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::Rejected { code, .. } if code == "404")
    }
}

impl From<BrokerError> for iotagent_core::Error {
    fn from(e: BrokerError) -> Self {
        iotagent_core::Error::Registration(e.to_string())
    }
}
