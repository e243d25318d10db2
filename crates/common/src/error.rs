//! Common error types for vigil components.

use std::fmt;

/// A specialized Result type for vigil operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Daemon-level error type.
///
/// Library modules keep their own error enums; these are the classes the
/// binary reports when startup or a background task gives up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("ICMP error: {0}")]
    Icmp(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new plugin (registry) error.
    pub fn plugin(msg: impl fmt::Display) -> Self {
        Error::Plugin(msg.to_string())
    }

    /// Create a new ICMP error.
    pub fn icmp(msg: impl fmt::Display) -> Self {
        Error::Icmp(msg.to_string())
    }

    /// Create a new store error.
    pub fn store(msg: impl fmt::Display) -> Self {
        Error::Store(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Whether this error should abort startup rather than be logged and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Plugin(_) | Error::Icmp(_))
    }
}
