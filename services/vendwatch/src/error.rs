//! Error types for the vendwatch service

use std::fmt;

/// Errors that can occur in the vendwatch service
#[derive(Debug, thiserror::Error)]
pub enum VendwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("State store error: {0}")]
    State(String),

    #[error("Recipient store error: {0}")]
    Recipients(String),
}

/// Result type alias for vendwatch operations
pub type Result<T> = std::result::Result<T, VendwatchError>;

/// Outcome of a failed delivery attempt, classified for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Network, timeout, rate limit or server-side failure; worth retrying
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The recipient can no longer be reached (blocked, deactivated, deleted)
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

/// The poll cycle stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticating,
    Fetching,
    Dispatching,
    Committing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Authenticating => write!(f, "authenticating"),
            Stage::Fetching => write!(f, "fetching"),
            Stage::Dispatching => write!(f, "dispatching"),
            Stage::Committing => write!(f, "committing"),
        }
    }
}

/// A tick that was aborted before its state could be committed
#[derive(Debug, thiserror::Error)]
#[error("tick failed while {stage}: {source}")]
pub struct TickError {
    pub stage: Stage,
    #[source]
    pub source: VendwatchError,
}
