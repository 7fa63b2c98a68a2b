use thiserror::Error;

/// Errors produced by diff application and propagation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiffTrackError {
    /// A sequence index falls outside the bounds valid for the operation.
    #[error("index {index} out of range for sequence of length {len}")]
    OutOfRange { index: usize, len: usize },

    /// A mapping delete targeted a key that is not present.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// An INSERT, REPLACE or SET diff arrived without a payload.
    #[error("{kind} diff carries no value")]
    MissingValue { kind: String },

    /// Batch misuse, double attachment, or a mutation issued mid-dispatch.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Callback-induced diffs nested deeper than the listener allows.
    #[error("recursion limit exceeded: more than {limit} nested diffs")]
    RecursionLimitExceeded { limit: usize },
}

/// Convenience alias used throughout the difftrack crates.
pub type Result<T> = std::result::Result<T, DiffTrackError>;
