//! File enumeration and train / valid / test partitioning
//!
//! Files from every configured directory are gathered, shuffled once and cut
//! into three contiguous ranges by cumulative split fractions.

use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DataError, Result};

/// Tolerance when checking that fractions sum to at most one
const FRACTION_SUM_EPSILON: f64 = 1e-9;

/// One of the three dataset partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fractions of the file list assigned to each split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    pub train: f64,
    pub valid: f64,
    pub test: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: 0.8,
            valid: 0.1,
            test: 0.1,
        }
    }
}

/// Exclusive end offsets of the three splits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitBoundaries {
    pub train_end: usize,
    pub valid_end: usize,
    pub test_end: usize,
}

impl SplitFractions {
    pub fn new(train: f64, valid: f64, test: f64) -> Self {
        Self { train, valid, test }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.train, self.valid, self.test]
    }

    /// Check the fractions themselves, independent of any file count
    pub fn validate(&self) -> Result<()> {
        self.check_fractions(0)
    }

    fn check_fractions(&self, num_files: usize) -> Result<()> {
        let fractions = self.as_array();
        if fractions.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err(self.invalid(num_files, "fractions must be finite and non-negative"));
        }
        if fractions.iter().sum::<f64>() > 1.0 + FRACTION_SUM_EPSILON {
            return Err(self.invalid(num_files, "fractions sum to more than 1"));
        }
        Ok(())
    }

    /// Compute split end offsets for `num_files` files.
    ///
    /// Each split must be non-empty: `0 < train_end < valid_end < test_end`.
    pub fn boundaries(&self, num_files: usize) -> Result<SplitBoundaries> {
        self.check_fractions(num_files)?;

        let acc_train = self.train;
        let acc_valid = acc_train + self.valid;
        let acc_test = acc_valid + self.test;
        let end = |acc: f64| ((num_files as f64 * acc).floor() as usize).min(num_files);

        let bounds = SplitBoundaries {
            train_end: end(acc_train),
            valid_end: end(acc_valid),
            test_end: end(acc_test),
        };

        if bounds.train_end == 0 {
            return Err(self.invalid(num_files, "train split is empty"));
        }
        if bounds.valid_end <= bounds.train_end {
            return Err(self.invalid(num_files, "valid split is empty"));
        }
        if bounds.test_end <= bounds.valid_end {
            return Err(self.invalid(num_files, "test split is empty"));
        }
        Ok(bounds)
    }

    fn invalid(&self, num_files: usize, reason: &str) -> DataError {
        DataError::InvalidSplits {
            fractions: self.as_array(),
            num_files,
            reason: reason.into(),
        }
    }
}

/// A file found during enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    pub dir: PathBuf,
    pub file_name: String,
}

impl FileEntry {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// List the eligible files of every directory.
///
/// Missing directories are skipped. Names are sorted per directory so a
/// seeded shuffle is reproducible regardless of `read_dir` order.
pub fn enumerate_files<P, F>(dirs: &[P], is_valid: F) -> Result<Vec<FileEntry>>
where
    P: AsRef<Path>,
    F: Fn(&str) -> bool,
{
    let mut files = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!("Skipping missing data directory {}", dir.display());
            continue;
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| DataError::io(dir, e))? {
            let entry = entry.map_err(|e| DataError::io(dir, e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(true);
            if is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        files.extend(names.into_iter().map(|name| FileEntry::new(dir, name)));
    }
    Ok(files)
}

/// Immutable, shuffled file list cut into train / valid / test ranges
#[derive(Debug, Clone)]
pub struct FilePartition {
    files: Vec<FileEntry>,
    bounds: SplitBoundaries,
    fractions: SplitFractions,
}

impl FilePartition {
    /// Shuffle `files` and split them by `fractions`
    pub fn new(
        mut files: Vec<FileEntry>,
        fractions: SplitFractions,
        seed: Option<u64>,
    ) -> Result<Self> {
        let bounds = fractions.boundaries(files.len())?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        files.shuffle(&mut rng);

        info!(
            total = files.len(),
            train = bounds.train_end,
            valid = bounds.valid_end - bounds.train_end,
            test = bounds.test_end - bounds.valid_end,
            "Partitioned files"
        );

        Ok(Self {
            files,
            bounds,
            fractions,
        })
    }

    /// Enumerate `dirs` and partition the result
    pub fn from_dirs<P, F>(
        dirs: &[P],
        is_valid: F,
        fractions: SplitFractions,
        seed: Option<u64>,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> bool,
    {
        let files = enumerate_files(dirs, is_valid)?;
        Self::new(files, fractions, seed)
    }

    pub fn range(&self, split: Split) -> Range<usize> {
        match split {
            Split::Train => 0..self.bounds.train_end,
            Split::Valid => self.bounds.train_end..self.bounds.valid_end,
            Split::Test => self.bounds.valid_end..self.bounds.test_end,
        }
    }

    pub fn files(&self, split: Split) -> &[FileEntry] {
        &self.files[self.range(split)]
    }

    /// Every enumerated file in shuffled order, including any tail that
    /// fractions summing below one leave unassigned
    pub fn all_files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn boundaries(&self) -> SplitBoundaries {
        self.bounds
    }

    pub fn fractions(&self) -> SplitFractions {
        self.fractions
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
