//! Data managers
//!
//! A data manager hands out train / valid / test batches. The cached
//! managers here own one [`PrefetchCache`] per split, all built eagerly at
//! construction, and the file-backed manager feeds those caches from a
//! [`FilePartition`] through a retrying [`FileBatchReader`].

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cursor::{BatchCursor, DataSource, ListSource};
use super::partition::{FileEntry, FilePartition, Split};
use super::prefetcher::{Loader, PrefetchCache, ServeOrder};
use crate::adapters::{stack_samples, FileAdapter};
use crate::config::DataConfig;
use crate::error::{DataError, Result};
use crate::metrics::DataMetrics;

/// Read rounds allowed to fill one batch before giving up
pub const MAX_READ_ATTEMPTS: usize = 100;

/// Source of batches for the three splits
pub trait DataManager {
    type Batch;

    fn batch_size(&self) -> usize;

    fn batch(&mut self, split: Split) -> Result<Self::Batch>;

    fn train_batch(&mut self) -> Result<Self::Batch> {
        self.batch(Split::Train)
    }

    fn valid_batch(&mut self) -> Result<Self::Batch> {
        self.batch(Split::Valid)
    }

    fn test_batch(&mut self) -> Result<Self::Batch> {
        self.batch(Split::Test)
    }
}

/// Prefetch depth per split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSizes {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

impl CacheSizes {
    pub fn new(train: usize, valid: usize, test: usize) -> Self {
        Self { train, valid, test }
    }

    /// Depth ≤ 1 everywhere, so every batch is loaded on demand
    pub fn synchronous() -> Self {
        Self::new(1, 1, 1)
    }

    pub fn get(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Valid => self.valid,
            Split::Test => self.test,
        }
    }
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self::new(32, 2, 2)
    }
}

/// Three independent prefetch caches, one per split
pub struct CachedDataManager<T> {
    batch_size: usize,
    train: PrefetchCache<T>,
    valid: PrefetchCache<T>,
    test: PrefetchCache<T>,
    metrics: Arc<DataMetrics>,
}

impl<T: Send + 'static> CachedDataManager<T> {
    /// Build all three caches, asking `make_loader` for each split's loader
    pub fn new<F>(
        batch_size: usize,
        sizes: CacheSizes,
        order: ServeOrder,
        metrics: Arc<DataMetrics>,
        mut make_loader: F,
    ) -> Result<Self>
    where
        F: FnMut(Split) -> Result<Loader<T>>,
    {
        let mut cache = |split: Split| -> Result<PrefetchCache<T>> {
            PrefetchCache::with_metrics(
                split.as_str(),
                make_loader(split)?,
                sizes.get(split),
                order,
                metrics.clone(),
            )
        };
        let train = cache(Split::Train)?;
        let valid = cache(Split::Valid)?;
        let test = cache(Split::Test)?;

        Ok(Self {
            batch_size,
            train,
            valid,
            test,
            metrics,
        })
    }

    pub fn cache(&self, split: Split) -> &PrefetchCache<T> {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }

    fn cache_mut(&mut self, split: Split) -> &mut PrefetchCache<T> {
        match split {
            Split::Train => &mut self.train,
            Split::Valid => &mut self.valid,
            Split::Test => &mut self.test,
        }
    }

    pub fn metrics(&self) -> &Arc<DataMetrics> {
        &self.metrics
    }
}

impl<T: Send + 'static> DataManager for CachedDataManager<T> {
    type Batch = T;

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batch(&mut self, split: Split) -> Result<T> {
        self.cache_mut(split).get()
    }
}

/// Fills batches from a file cursor, skipping files that fail to read
pub struct FileBatchReader<A: FileAdapter> {
    adapter: Arc<A>,
    batch_size: usize,
    sample_shape: Vec<usize>,
    metrics: Arc<DataMetrics>,
    rng: StdRng,
}

impl<A: FileAdapter> FileBatchReader<A> {
    pub fn new(
        adapter: Arc<A>,
        batch_size: usize,
        metrics: Arc<DataMetrics>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            sample_shape: adapter.sample_shape(),
            adapter,
            batch_size,
            metrics,
            rng,
        }
    }

    /// Read one file, checking the sample against the declared shape
    pub fn read_one(&self, file: &FileEntry) -> Result<ArrayD<f32>> {
        let path = file.path();
        let sample = self.adapter.read_file(&path)?;
        if sample.shape() != self.sample_shape.as_slice() {
            return Err(DataError::InvalidSample {
                path,
                reason: format!("shape {:?}, expected {:?}", sample.shape(), self.sample_shape),
            });
        }
        Ok(sample)
    }

    /// Produce exactly `batch_size` samples in random order.
    ///
    /// Each round asks the cursor for the missing number of files. Files
    /// that fail are logged, counted and replaced in the next round. After
    /// [`MAX_READ_ATTEMPTS`] rounds a short batch is an error.
    pub fn read_batch<S>(&mut self, cursor: &mut BatchCursor<S>) -> Result<Vec<ArrayD<f32>>>
    where
        S: DataSource<Item = FileEntry>,
    {
        let mut samples = Vec::with_capacity(self.batch_size);
        let mut attempts = 0;
        while attempts < MAX_READ_ATTEMPTS && samples.len() < self.batch_size {
            let files = cursor.next(self.batch_size - samples.len())?;
            for file in &files {
                match self.read_one(file) {
                    Ok(sample) => {
                        self.metrics.files_read.inc();
                        samples.push(sample);
                    }
                    Err(e) => {
                        warn!(
                            recoverable = e.is_recoverable(),
                            "Skipping {}: {}",
                            file.path().display(),
                            e
                        );
                        self.metrics.record_skip(e.to_string());
                    }
                }
            }
            attempts += 1;
        }

        samples.truncate(self.batch_size);
        if samples.len() < self.batch_size {
            return Err(DataError::BatchExhausted {
                requested: self.batch_size,
                got: samples.len(),
                attempts,
            });
        }
        samples.shuffle(&mut self.rng);
        Ok(samples)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Derive an independent per-split seed from the configured one
fn split_seed(seed: Option<u64>, split: Split, salt: u64) -> Option<u64> {
    let index = Split::ALL.iter().position(|s| *s == split).unwrap_or(0) as u64;
    seed.map(|s| s.wrapping_mul(31).wrapping_add(index * 2 + salt + 1))
}

/// File-backed manager: partitions the files of the configured directories
/// and serves stacked batches `[batch, ...sample_shape]` for each split
pub struct FileDataManager<A: FileAdapter> {
    inner: CachedDataManager<ArrayD<f32>>,
    partition: FilePartition,
    adapter: Arc<A>,
}

impl<A: FileAdapter> FileDataManager<A> {
    pub fn new(config: &DataConfig, adapter: A) -> Result<Self> {
        config.validate()?;
        let adapter = Arc::new(adapter);
        let partition = FilePartition::from_dirs(
            &config.file_dirs,
            |name| adapter.is_valid_file_name(name),
            config.splits,
            config.seed,
        )?;

        let metrics = Arc::new(DataMetrics::new());
        let batch_size = config.batch_size;
        let inner = CachedDataManager::new(
            batch_size,
            config.cache_sizes,
            config.serve_order,
            metrics.clone(),
            |split| {
                let source = ListSource::new(partition.files(split).to_vec());
                let mut cursor = match split_seed(config.seed, split, 0) {
                    Some(seed) => BatchCursor::with_seed(source, seed),
                    None => BatchCursor::new(source),
                };
                let mut reader = FileBatchReader::new(
                    adapter.clone(),
                    batch_size,
                    metrics.clone(),
                    split_seed(config.seed, split, 1),
                );
                let metrics = metrics.clone();
                let loader: Loader<ArrayD<f32>> = Box::new(move || {
                    let samples = reader.read_batch(&mut cursor)?;
                    if split == Split::Train {
                        metrics.current_epoch.set(cursor.epoch() as i64);
                    }
                    stack_samples(&samples)
                });
                Ok(loader)
            },
        )?;

        info!(
            files = partition.len(),
            batch_size,
            dirs = ?config.file_dirs,
            "File data manager ready"
        );

        Ok(Self {
            inner,
            partition,
            adapter,
        })
    }

    pub fn partition(&self) -> &FilePartition {
        &self.partition
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn metrics(&self) -> &Arc<DataMetrics> {
        self.inner.metrics()
    }

    pub fn cache(&self, split: Split) -> &PrefetchCache<ArrayD<f32>> {
        self.inner.cache(split)
    }

    /// Paths of every file in `split`
    pub fn split_paths(&self, split: Split) -> Vec<PathBuf> {
        self.partition.files(split).iter().map(FileEntry::path).collect()
    }
}

impl<A: FileAdapter> DataManager for FileDataManager<A> {
    type Batch = ArrayD<f32>;

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn batch(&mut self, split: Split) -> Result<ArrayD<f32>> {
        self.inner.batch(split)
    }
}
