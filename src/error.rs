//! Error types shared across the radar

use crate::store::PersistenceError;

/// Failure to obtain data from an external feed.
///
/// Always transient from the radar's point of view: the run carries on with
/// stored data for the affected source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Source not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Configuration errors, raised once at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metric table: {0}")]
    InvalidMetrics(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Errors that stop a run
#[derive(Debug, thiserror::Error)]
pub enum RadarError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}
