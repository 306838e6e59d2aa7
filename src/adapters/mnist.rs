//! MNIST adapter
//!
//! Loads the IDX image files into memory and serves `[batch, 28, 28]`
//! arrays through the same cursor and cache machinery as the file-backed
//! datasets. The first `validation_size` training images form the
//! validation split.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, ArrayD};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::stack_samples;
use crate::data::{
    list_cursor, CacheSizes, CachedDataManager, DataManager, Loader, ServeOrder, Split,
};
use crate::error::{DataError, Result};
use crate::metrics::DataMetrics;

/// IDX magic number for unsigned-byte rank-3 tensors
const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_HEADER_LEN: usize = 16;

/// Side of an MNIST digit image
pub const MNIST_SIDE: usize = 28;

pub const TRAIN_IMAGES_FILE: &str = "train-images-idx3-ubyte";
pub const TEST_IMAGES_FILE: &str = "t10k-images-idx3-ubyte";

/// Options for the MNIST manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MnistOptions {
    /// Directory holding the IDX files
    pub data_dir: PathBuf,
    /// Map pixels to exactly 0.0 / 1.0 at the 0.5 threshold
    pub binarize: bool,
    /// Training images held out for validation
    pub validation_size: usize,
    pub cache_sizes: CacheSizes,
    pub seed: Option<u64>,
}

impl Default for MnistOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("mnist_data"),
            binarize: false,
            validation_size: 5000,
            cache_sizes: CacheSizes::synchronous(),
            seed: None,
        }
    }
}

/// Images decoded from one IDX file, scaled to `[0, 1]`
#[derive(Debug, Clone)]
pub struct IdxImages {
    pub rows: usize,
    pub cols: usize,
    pub images: Vec<Array2<f32>>,
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// Parse an in-memory IDX3 image file
pub fn parse_idx_images(path: &Path, bytes: &[u8]) -> Result<IdxImages> {
    let invalid = |reason: String| DataError::InvalidIdx {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.len() < IDX_HEADER_LEN {
        return Err(invalid(format!(
            "header needs {} bytes, file has {}",
            IDX_HEADER_LEN,
            bytes.len()
        )));
    }
    let magic = be_u32(bytes, 0);
    if magic != IDX_IMAGES_MAGIC {
        return Err(invalid(format!(
            "magic {:#010x}, expected {:#010x}",
            magic, IDX_IMAGES_MAGIC
        )));
    }
    let count = be_u32(bytes, 4) as usize;
    let rows = be_u32(bytes, 8) as usize;
    let cols = be_u32(bytes, 12) as usize;

    let image_len = rows
        .checked_mul(cols)
        .ok_or_else(|| invalid(format!("{}x{} images overflow", rows, cols)))?;
    if image_len == 0 && count > 0 {
        return Err(invalid(format!("{} images of {}x{} have no pixels", count, rows, cols)));
    }
    let expected = count
        .checked_mul(image_len)
        .ok_or_else(|| invalid(format!("{} images of {}x{} overflow", count, rows, cols)))?;

    let pixels = &bytes[IDX_HEADER_LEN..];
    if pixels.len() != expected {
        return Err(invalid(format!(
            "{} images of {}x{} need {} bytes, found {}",
            count,
            rows,
            cols,
            expected,
            pixels.len()
        )));
    }

    let images: Vec<Array2<f32>> = pixels
        .chunks_exact(image_len.max(1))
        .map(|chunk| {
            Array2::from_shape_fn((rows, cols), |(r, c)| chunk[r * cols + c] as f32 / 255.0)
        })
        .collect();
    if images.len() != count {
        return Err(invalid(format!("decoded {} of {} images", images.len(), count)));
    }
    Ok(IdxImages { rows, cols, images })
}

/// Read and parse an IDX3 image file from disk
pub fn read_idx_images(path: &Path) -> Result<IdxImages> {
    let bytes = fs::read(path).map_err(|e| DataError::io(path, e))?;
    parse_idx_images(path, &bytes)
}

/// MNIST batches for the three splits
pub struct MnistDataManager {
    inner: CachedDataManager<ArrayD<f32>>,
    split_sizes: [usize; 3],
}

impl MnistDataManager {
    /// Load the IDX files from `options.data_dir`
    pub fn new(batch_size: usize, options: MnistOptions) -> Result<Self> {
        let train = read_idx_images(&options.data_dir.join(TRAIN_IMAGES_FILE))?;
        let test = read_idx_images(&options.data_dir.join(TEST_IMAGES_FILE))?;
        for (file, images) in [(TRAIN_IMAGES_FILE, &train), (TEST_IMAGES_FILE, &test)] {
            if (images.rows, images.cols) != (MNIST_SIDE, MNIST_SIDE) {
                return Err(DataError::InvalidIdx {
                    path: options.data_dir.join(file),
                    reason: format!(
                        "images are {}x{}, expected {}x{}",
                        images.rows, images.cols, MNIST_SIDE, MNIST_SIDE
                    ),
                });
            }
        }
        Self::from_images(batch_size, train.images, test.images, options)
    }

    /// Build from already decoded images
    pub fn from_images(
        batch_size: usize,
        mut train: Vec<Array2<f32>>,
        test: Vec<Array2<f32>>,
        options: MnistOptions,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(DataError::InvalidConfig {
                reason: "batch_size must be positive".into(),
            });
        }
        if options.validation_size == 0 || options.validation_size >= train.len() {
            return Err(DataError::InvalidConfig {
                reason: format!(
                    "validation_size {} must be in 1..{}",
                    options.validation_size,
                    train.len()
                ),
            });
        }
        if test.is_empty() {
            return Err(DataError::InvalidConfig {
                reason: "no test images".into(),
            });
        }

        let train_split = train.split_off(options.validation_size);
        let mut splits = [Some(train_split), Some(train), Some(test)];
        let split_sizes = [
            splits[0].as_ref().map_or(0, Vec::len),
            splits[1].as_ref().map_or(0, Vec::len),
            splits[2].as_ref().map_or(0, Vec::len),
        ];

        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let binarize = options.binarize;
        let inner = CachedDataManager::new(
            batch_size,
            options.cache_sizes,
            ServeOrder::Fifo,
            Arc::new(DataMetrics::new()),
            |split| {
                let index = match split {
                    Split::Train => 0,
                    Split::Valid => 1,
                    Split::Test => 2,
                };
                let mut images = splits[index].take().unwrap_or_default();
                images.shuffle(&mut rng);
                let seed = options.seed.map(|s| s.wrapping_add(index as u64 + 1));
                let mut cursor = list_cursor(images, seed);
                let loader: Loader<ArrayD<f32>> = Box::new(move || {
                    let samples: Vec<ArrayD<f32>> = cursor
                        .next(batch_size)?
                        .into_iter()
                        .map(|image| image.into_dyn())
                        .collect();
                    let batch = stack_samples(&samples)?;
                    Ok(if binarize {
                        batch.mapv(|v| if v >= 0.5 { 1.0 } else { 0.0 })
                    } else {
                        batch
                    })
                });
                Ok(loader)
            },
        )?;

        info!(
            train = split_sizes[0],
            valid = split_sizes[1],
            test = split_sizes[2],
            binarize,
            "MNIST data manager ready"
        );
        Ok(Self { inner, split_sizes })
    }

    /// Number of images in `split`
    pub fn split_len(&self, split: Split) -> usize {
        match split {
            Split::Train => self.split_sizes[0],
            Split::Valid => self.split_sizes[1],
            Split::Test => self.split_sizes[2],
        }
    }
}

impl DataManager for MnistDataManager {
    type Batch = ArrayD<f32>;

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn batch(&mut self, split: Split) -> Result<ArrayD<f32>> {
        self.inner.batch(split)
    }
}
