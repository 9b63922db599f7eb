//! Bus error types

use thiserror::Error;

/// Errors raised by a bus transport
#[derive(Error, Debug)]
pub enum BusError {
    /// Envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The transport has been disconnected
    #[error("Bus transport is disconnected")]
    Disconnected,

    /// Transport-specific failure
    #[error("Bus transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}
