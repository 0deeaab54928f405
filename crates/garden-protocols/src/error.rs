//! Error types for garden-protocols.

use thiserror::Error;

/// Result type for garden-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating with peers.
#[derive(Debug, Error)]
pub enum Error {
    /// A locally authored action could not be turned into a message.
    #[error("invalid message: {0}")]
    Decode(#[from] garden_log::DecodeError),

    /// The transport refused or failed an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reading or writing the persisted log failed.
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    /// The named peer is not known to the transport.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
}
