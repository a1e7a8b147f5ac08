//! Error types for Quaero

use thiserror::Error;

/// Result type alias using Quaero's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for search operations
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied argument failed validation. Raised before any
    /// backend work is issued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    /// A backend operation failed. Device state cannot be rolled back
    /// mid-generation, so the run must be restarted from scratch;
    /// retrying the failed call is unsafe.
    #[error("device error: {0}")]
    Device(String),

    /// An append was issued on a sequence buffer that already reached
    /// its maximum length.
    #[error("sequence buffer full: length {length} == max_length {max_length}")]
    SequenceCapacity { length: usize, max_length: usize },

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
