//! Error types for the synchronization engine.
//!
//! None of these are fatal: transport errors degrade the connection to
//! `Disconnected`, decode errors discard a single message.

use thiserror::Error;

/// Errors raised by a transport while opening or using a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same address can ever succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl(_))
    }
}

/// Errors raised while decoding an inbound payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Cursor stored under {key} belongs to {user_id}")]
    CursorKeyMismatch { key: String, user_id: String },
    #[error("Duplicate text element id: {0}")]
    DuplicateTextElement(String),
}

/// Errors raised while encoding an outbound message.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Non-finite coordinate in {0}")]
    NonFiniteCoordinate(&'static str),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
