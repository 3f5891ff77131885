//! Error types for the StreamProcessor

use thiserror::Error;

/// Errors surfaced by the StreamProcessor lifecycle
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stream processor is already running")]
    AlreadyRunning,

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Transport errors from the broker client boundary
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker client could not be constructed at all
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A single poll failed; the loop backs off and retries
    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("Broker client is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the snapshot sink boundary
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink call timed out after {0}ms")]
    Timeout(u64),

    #[error("Sink rejected snapshot: {0}")]
    Rejected(String),
}

/// Wire decoding failures
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Top-level value is not an object (found {0})")]
    NotAnObject(&'static str),
}

/// Payload validation failures raised by aggregation handlers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("Order amount missing")]
    MissingAmount,

    #[error("Order amount is not a number: {0}")]
    InvalidAmount(String),

    #[error("Order amount {0} outside accepted range")]
    AmountOutOfRange(f64),

    #[error("Search query missing or not a string")]
    MissingQuery,

    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Search query too long ({len} chars, max {max})")]
    QueryTooLong { len: usize, max: usize },
}

/// Configuration validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than 0")]
    Zero { field: &'static str },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    /// Create a new invalid-value error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}
