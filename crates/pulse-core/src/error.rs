//! Error types for Pulse Core

use thiserror::Error;

/// Result type alias for collection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Collection pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    // Delivery errors
    #[error("Device is offline")]
    DeviceOffline,

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Collector rejected request: status {status}")]
    CollectorStatus { status: u16 },

    #[error("Unparseable collector response: {0}")]
    CollectorResponse(String),

    // Persistence errors
    #[error("Hit store error: {0}")]
    Store(String),

    // Serialization errors
    #[error("Payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid collector URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if a delivery attempt that failed with this error may be
    /// retried (transport-level failures; HTTP statuses are classified
    /// separately).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DeviceOffline | Error::RequestTimeout | Error::Network(_)
        )
    }

    /// Returns the error code used in log fields
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::DeviceOffline => "DEVICE_OFFLINE",
            Error::RequestTimeout => "TIMEOUT",
            Error::Network(_) => "NETWORK",
            Error::CollectorStatus { .. } => "COLLECTOR_STATUS",
            Error::CollectorResponse(_) => "COLLECTOR_RESPONSE",
            Error::Store(_) => "STORE",
            Error::Payload(_) => "PAYLOAD",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Internal(_) => "INTERNAL",
        }
    }
}
