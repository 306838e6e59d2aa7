//! Dataset adapters
//!
//! An adapter decides which files belong to a dataset and turns each one
//! into a fixed-shape `f32` array. The data managers treat adapters as
//! opaque plug-ins.

pub mod face;
pub mod mnist;

use std::path::Path;

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::{DataError, Result};

pub use face::{FaceImageAdapter, ImageOptions};
pub use mnist::{MnistDataManager, MnistOptions};

/// Plug-in describing a file-backed dataset
pub trait FileAdapter: Send + Sync + 'static {
    /// Whether a directory entry belongs to the dataset
    fn is_valid_file_name(&self, file_name: &str) -> bool;

    /// Decode and transform one file
    fn read_file(&self, path: &Path) -> Result<ArrayD<f32>>;

    /// Shape every sample produced by `read_file` has
    fn sample_shape(&self) -> Vec<usize>;
}

/// Stack equally shaped samples along a new leading batch axis
pub fn stack_samples(samples: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    if samples.is_empty() {
        return Err(DataError::InvalidConfig {
            reason: "cannot stack an empty batch".into(),
        });
    }
    let views: Vec<ArrayViewD<'_, f32>> = samples.iter().map(|s| s.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}
