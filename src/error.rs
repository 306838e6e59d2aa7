//! Error types for facedata
//!
//! Taxonomy covering per-file read failures, configuration mistakes,
//! batch exhaustion and prefetch worker lifecycle.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all facedata operations
#[derive(Debug, Error)]
pub enum DataError {
    // ========== Per-file Errors (recoverable) ==========

    /// Reading a file from disk failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image could not be decoded
    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Decoded sample does not have the expected content
    #[error("Invalid sample {path}: {reason}")]
    InvalidSample { path: PathBuf, reason: String },

    // ========== Configuration Errors ==========

    /// Train / valid / test fractions produce an unusable split
    #[error("Invalid train / valid / test splits {fractions:?} for {num_files} files: {reason}")]
    InvalidSplits {
        fractions: [f64; 3],
        num_files: usize,
        reason: String,
    },

    /// Any other configuration problem
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    // ========== Batch Errors ==========

    /// Too many consecutive read failures to fill a batch
    #[error("Batch exhausted: wanted {requested} samples, got {got} after {attempts} attempts")]
    BatchExhausted {
        requested: usize,
        got: usize,
        attempts: usize,
    },

    /// Cursor asked for items from an empty collection
    #[error("Cannot draw {requested} items from an empty source")]
    EmptySource { requested: usize },

    /// Samples in a batch do not share one shape
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    // ========== Prefetch Worker Errors ==========

    /// A load task is already in flight
    #[error("Load task already running")]
    TaskAlreadyRunning,

    /// Join requested while no load task is in flight
    #[error("No load task running")]
    NoTaskRunning,

    /// OS refused to start the worker thread
    #[error("Failed to spawn prefetch worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// Background worker panicked before returning its results
    #[error("Prefetch worker panicked: {message}")]
    WorkerPanicked { message: String },

    // ========== Dataset Format Errors ==========

    /// MNIST IDX file is malformed
    #[error("Invalid IDX file {path}: {reason}")]
    InvalidIdx { path: PathBuf, reason: String },

    /// Face metadata query failed
    #[error("Metadata store error: {0}")]
    Metadata(#[from] rusqlite::Error),
}

impl DataError {
    /// Build an I/O error tagged with the offending path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the failure is confined to a single file and the
    /// caller may skip it and move on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DataError::Io { .. } | DataError::ImageDecode { .. } | DataError::InvalidSample { .. }
        )
    }

    /// Returns true if this error indicates bad configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DataError::InvalidSplits { .. }
                | DataError::InvalidConfig { .. }
                | DataError::ConfigParse(_)
        )
    }
}

/// Result type alias for facedata operations
pub type Result<T> = std::result::Result<T, DataError>;
