//! Error types for Strike Flux

use thiserror::Error;

/// Errors that can occur while ingesting telemetry or configuring the pipeline
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid hex frame: {0}")]
    InvalidHex(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Replay line {line}: {message}")]
    ReplayParse { line: usize, message: String },

    #[error("Command delivery failed: {0}")]
    CommandDelivery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyticsError {
    /// True for structural frame errors, which are dropped rather than surfaced
    pub fn is_malformed_frame(&self) -> bool {
        matches!(self, AnalyticsError::MalformedFrame { .. })
    }
}
