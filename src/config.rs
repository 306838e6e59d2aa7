//! Configuration for data managers and preprocessing
//!
//! Values come from defaults, an optional JSON file and `FACEDATA_*`
//! environment overrides, in that order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::ImageOptions;
use crate::data::{CacheSizes, ServeOrder, SplitFractions};
use crate::error::{DataError, Result};

/// Default location of the preprocessed AFLW face crops
pub const DEFAULT_FACE_DIR: &str = "../aflw/aflw/data/flickr_face";

/// Data manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Samples per batch
    pub batch_size: usize,
    /// Prefetch depth for train / valid / test
    pub cache_sizes: CacheSizes,
    /// Train / valid / test fractions
    pub splits: SplitFractions,
    /// Directories scanned for sample files
    pub file_dirs: Vec<PathBuf>,
    /// Seed for partition and batch shuffles; entropy when absent
    pub seed: Option<u64>,
    /// Serving order within a prefetched round
    pub serve_order: ServeOrder,
    /// Face image geometry
    pub image: ImageOptions,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            cache_sizes: CacheSizes::default(),
            splits: SplitFractions::default(),
            file_dirs: vec![PathBuf::from(DEFAULT_FACE_DIR)],
            seed: None,
            serve_order: ServeOrder::default(),
            image: ImageOptions::default(),
        }
    }
}

impl DataConfig {
    /// Defaults pointed at `file_dirs`
    pub fn with_dirs(batch_size: usize, file_dirs: Vec<PathBuf>) -> Self {
        Self {
            batch_size,
            file_dirs,
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    ///
    /// Recognised keys: `FACEDATA_BATCH_SIZE`, `FACEDATA_DATA_DIRS`
    /// (platform path-list syntax), `FACEDATA_SEED`, `FACEDATA_CACHE_SIZES`
    /// (`train,valid,test`) and `FACEDATA_GRAYSCALE`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FACEDATA_BATCH_SIZE") {
            self.batch_size = parse_value("FACEDATA_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("FACEDATA_DATA_DIRS") {
            self.file_dirs = std::env::split_paths(&value).collect();
        }
        if let Some(value) = lookup("FACEDATA_SEED") {
            self.seed = Some(parse_value("FACEDATA_SEED", &value)?);
        }
        if let Some(value) = lookup("FACEDATA_CACHE_SIZES") {
            let sizes = value
                .split(',')
                .map(|part| parse_value::<usize>("FACEDATA_CACHE_SIZES", part.trim()))
                .collect::<Result<Vec<_>>>()?;
            match sizes.as_slice() {
                [train, valid, test] => self.cache_sizes = CacheSizes::new(*train, *valid, *test),
                _ => {
                    return Err(DataError::InvalidConfig {
                        reason: format!("FACEDATA_CACHE_SIZES needs three values, got {:?}", value),
                    })
                }
            }
        }
        if let Some(value) = lookup("FACEDATA_GRAYSCALE") {
            self.image.force_grayscale = parse_value("FACEDATA_GRAYSCALE", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidConfig {
                reason: "batch_size must be positive".into(),
            });
        }
        if self.image.width == 0 || self.image.height == 0 {
            return Err(DataError::InvalidConfig {
                reason: format!("image size {}x{} is empty", self.image.width, self.image.height),
            });
        }
        self.splits.validate()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| DataError::InvalidConfig {
        reason: format!("{} has unparseable value {:?}", key, value),
    })
}

/// Settings for one face-crop preprocessing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Dataset root
    pub data_root: PathBuf,
    /// Folder under the root whose subdirectories hold source images
    pub source_folder: String,
    /// Folder under the root receiving face crops
    pub dest_folder: String,
    /// Side of the square output images
    pub output_size: u32,
}

impl PreprocessConfig {
    /// AFLW layout: `flickr/*/` images, 128 px crops in `flickr_face_1/`
    pub fn aflw(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            source_folder: "flickr".into(),
            dest_folder: "flickr_face_1".into(),
            output_size: 128,
        }
    }

    /// Anime face layout: `thumb/*/` images, 64 px crops in `thumb_face/`
    pub fn anime(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            source_folder: "thumb".into(),
            dest_folder: "thumb_face".into(),
            output_size: 64,
        }
    }

    pub fn dest_dir(&self) -> PathBuf {
        self.data_root.join(&self.dest_folder)
    }
}
