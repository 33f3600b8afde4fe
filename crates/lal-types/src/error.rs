use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("identifier must not be empty")]
    EmptyIdentifier,

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid block id: {0}")]
    InvalidBlockId(String),
}
