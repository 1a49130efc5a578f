use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body the backend attaches to non-success HTTP statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendErrorBody {
    pub error: String,
}

/// Failure taxonomy of the client core. Every failure is recoverable: the
/// orchestrator degrades (neutral vector, empty adaptation list, synthetic
/// sensing) rather than stopping.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network failure or non-success status on the request/response channel.
    #[error("transport failure: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Push channel unavailable or broken; the event in flight was dropped.
    #[error("push channel error: {0}")]
    Channel(String),

    /// Sensing device denied or absent; capture falls back to synthetic
    /// generation for the remainder of the session.
    #[error("sensor acquisition failed: {0}")]
    Sensor(String),

    /// Backend payload did not match the documented contract.
    #[error("invalid backend payload: {0}")]
    Payload(String),
}

impl CoreError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn transport_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }
}
