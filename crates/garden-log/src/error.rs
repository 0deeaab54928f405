//! Error types for garden-log.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// A message that could not be encoded or decoded.
///
/// Decode failures are always local to one message: callers skip the entry
/// and carry on with the rest of the batch.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The text is not a well-formed message object.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is absent for this kind.
    #[error("{kind} message is missing its {field}")]
    MissingField { kind: String, field: &'static str },

    /// A field that must carry a value is empty.
    #[error("empty {0}")]
    EmptyField(&'static str),

    /// The body does not have the shape this kind requires.
    #[error("invalid body for {kind} message: expected {expected}")]
    InvalidBody {
        kind: String,
        expected: &'static str,
    },
}

/// A persisted line that failed to load during hydrate.
#[derive(Debug, Error)]
#[error("line {line}: {source}")]
pub struct HydrationError {
    /// 1-based line number within the blob.
    pub line: usize,
    /// Why the line was rejected.
    #[source]
    pub source: DecodeError,
}
