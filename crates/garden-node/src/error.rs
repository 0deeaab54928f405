//! Error types for the Garden node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Peer did not follow the wire protocol
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Unusable terminal command
    #[error("{0}")]
    Command(String),

    /// Coordinator or transport error
    #[error("Protocol error: {0}")]
    Protocol(#[from] garden_protocols::Error),
}
