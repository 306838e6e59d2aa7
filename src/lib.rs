//! facedata core - batching and prefetch for image training datasets
//!
//! This crate provides:
//! - Batch cursors with epoch tracking over shuffleable sources
//! - Train / valid / test partitioning of file directories
//! - Single-worker prefetch caches overlapping loading with training
//! - Dataset adapters for face crops and MNIST
//! - Offline face-crop preprocessing

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod preprocess;

pub use adapters::{FaceImageAdapter, FileAdapter, MnistDataManager};
pub use config::DataConfig;
pub use data::{DataManager, FileDataManager, Split};
pub use error::{DataError, Result};

/// File data manager over face-crop PNGs
pub type FaceDataManager = FileDataManager<FaceImageAdapter>;

/// Build a face data manager from `config`, using its image options
pub fn face_data_manager(config: &DataConfig) -> Result<FaceDataManager> {
    FileDataManager::new(config, FaceImageAdapter::new(config.image))
}
