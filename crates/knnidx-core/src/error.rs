//! Error types for knnidx-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for knnidx-core operations.
pub type KnnResult<T> = Result<T, KnnError>;

/// Errors that can occur while building, persisting or querying an index.
#[derive(Debug, Error)]
pub enum KnnError {
    // ========================================================================
    // Construction / lifecycle errors
    // ========================================================================
    /// The metric tag is outside the supported set.
    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    /// `initialize_empty` was called on an index that already owns an engine.
    #[error("The index is already initialized")]
    AlreadyInitialized,

    /// A data operation was attempted before `initialize_empty` or `load_from_path`.
    #[error("The index has not been initialized or loaded")]
    UninitializedAccess,

    // ========================================================================
    // Data errors
    // ========================================================================
    /// The label is not stored in the index.
    #[error("Label {0} not found")]
    LabelNotFound(u64),

    /// The label is already stored in the index.
    #[error("Label {0} is already present in the index")]
    DuplicateLabel(u64),

    /// The vector length does not match the index dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The engine is full.
    #[error("Index capacity of {capacity} elements exceeded")]
    CapacityExceeded { capacity: usize },

    /// A caller-provided output buffer cannot hold the requested results.
    #[error("Output buffer too small: need {needed}, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// A numeric parameter is out of range.
    #[error("Invalid parameter `{name}`: {message}")]
    InvalidParameter { name: &'static str, message: String },

    // ========================================================================
    // Persistence errors
    // ========================================================================
    /// Reading or writing a persisted index failed.
    #[error("Index I/O error at {path}: {message}")]
    PersistenceIo { path: PathBuf, message: String },

    /// A persisted index could not be decoded or does not match this index.
    #[error("Index format error at {path}: {message}")]
    PersistenceFormat { path: PathBuf, message: String },

    // ========================================================================
    // Service errors
    // ========================================================================
    /// No partition with this id is loaded.
    #[error("Partition {0} not found")]
    PartitionNotFound(i32),

    /// A part does not share the metric, dimension or normalize flag of the
    /// parts already in the service.
    #[error("Incompatible index part: {0}")]
    IncompatiblePart(String),

    /// No query model is registered under this name.
    #[error("Query model not found: {0}")]
    ModelNotFound(String),

    /// No service is loaded for this region and no fallback applies.
    #[error("Region not found: {0}")]
    RegionNotFound(String),

    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Configuration file not found.
    #[error("Config not found at {0}")]
    ConfigNotFound(PathBuf),

    /// Configuration value or file is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========================================================================
    // General errors
    // ========================================================================
    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KnnError {
    /// Create a persistence I/O error.
    pub fn persistence_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PersistenceIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a persistence format error.
    pub fn persistence_format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PersistenceFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for I/O and format failures reported by the engine during save/load.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::PersistenceIo { .. } | Self::PersistenceFormat { .. }
        )
    }
}
