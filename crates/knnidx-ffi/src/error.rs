//! Error types for the C boundary.

use knnidx_core::KnnError;
use thiserror::Error;

/// Result type alias for boundary operations.
pub type BoundaryResult<T> = Result<T, BoundaryError>;

/// Errors raised while crossing the C boundary.
///
/// Every variant is rendered with `Display` into the caller's error buffer.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// Handle was never issued, or has been destroyed.
    #[error("Invalid or stale index handle: {0:#x}")]
    InvalidHandle(u64),

    /// A required pointer argument was null.
    #[error("Null pointer passed for {0}")]
    NullPointer(&'static str),

    /// A scalar or string argument is out of range or malformed.
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: &'static str, message: String },

    /// An earlier panic left the index lock poisoned.
    #[error("Index is unusable after an earlier panic")]
    Poisoned,

    /// A panic was caught before it could cross the boundary.
    #[error("Internal panic: {0}")]
    Panicked(String),

    /// Error from the index itself.
    #[error(transparent)]
    Core(#[from] KnnError),
}

impl BoundaryError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }
}
