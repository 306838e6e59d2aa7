//! Batch cursor over shuffleable collections
//!
//! A [`DataSource`] is any ordered collection that can hand out contiguous
//! ranges and reshuffle itself. [`BatchCursor`] walks a source in fixed-size
//! steps, reshuffling and counting an epoch every time a pass completes.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::error::{DataError, Result};

/// An ordered, shuffleable collection
pub trait DataSource: Send {
    /// Element handed out by the source
    type Item: Clone + Send;

    /// Number of items in the source
    fn len(&self) -> usize;

    /// True when the source holds no items
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items in `range`, in the current order
    fn access(&self, range: Range<usize>) -> Vec<Self::Item>;

    /// Reorder the source in place
    fn shuffle(&mut self, rng: &mut StdRng);
}

/// In-memory source backed by a `Vec`
#[derive(Debug, Clone, Default)]
pub struct ListSource<T> {
    items: Vec<T>,
}

impl<T> ListSource<T> {
    /// Wrap an existing list
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Current ordering of the items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T> From<Vec<T>> for ListSource<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T: Clone + Send> DataSource for ListSource<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.items.len()
    }

    fn access(&self, range: Range<usize>) -> Vec<T> {
        self.items[range].to_vec()
    }

    fn shuffle(&mut self, rng: &mut StdRng) {
        self.items.shuffle(rng);
    }
}

/// Walks a [`DataSource`] batch by batch, tracking offset and epoch.
///
/// The offset always stays in `[0, len)`: consuming the last item of a pass
/// reshuffles the source and starts the next epoch immediately. A request
/// that runs past the end is filled with the tail of the current pass
/// followed by the head of the next one, so no item is skipped.
pub struct BatchCursor<S: DataSource> {
    source: S,
    offset: usize,
    epoch: u64,
    rng: StdRng,
}

impl<S: DataSource> BatchCursor<S> {
    /// Create a cursor with an entropy-seeded shuffle
    pub fn new(source: S) -> Self {
        Self::from_rng(source, StdRng::from_entropy())
    }

    /// Create a cursor with a deterministic shuffle
    pub fn with_seed(source: S, seed: u64) -> Self {
        Self::from_rng(source, StdRng::seed_from_u64(seed))
    }

    fn from_rng(source: S, rng: StdRng) -> Self {
        Self {
            source,
            offset: 0,
            epoch: 0,
            rng,
        }
    }

    /// Take the next `n` items, wrapping into new epochs as needed
    pub fn next(&mut self, n: usize) -> Result<Vec<S::Item>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let size = self.source.len();
        if size == 0 {
            return Err(DataError::EmptySource { requested: n });
        }

        let mut batch = Vec::with_capacity(n);
        while batch.len() < n {
            let take = (n - batch.len()).min(size - self.offset);
            let end = self.offset + take;
            batch.extend(self.source.access(self.offset..end));
            self.offset = end;
            if self.offset == size {
                self.start_next_epoch();
            }
        }
        Ok(batch)
    }

    fn start_next_epoch(&mut self) {
        self.source.shuffle(&mut self.rng);
        self.offset = 0;
        self.epoch += 1;
        debug!(epoch = self.epoch, size = self.source.len(), "Cursor wrapped");
    }

    /// Completed passes over the source
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Position of the next item
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Fraction of the current pass already consumed, in `[0, 1)`
    pub fn progress(&self) -> f64 {
        match self.source.len() {
            0 => 0.0,
            size => self.offset as f64 / size as f64,
        }
    }

    /// Size of the underlying source
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Cursor over an in-memory list
pub fn list_cursor<T: Clone + Send>(
    items: Vec<T>,
    seed: Option<u64>,
) -> BatchCursor<ListSource<T>> {
    let source = ListSource::new(items);
    match seed {
        Some(seed) => BatchCursor::with_seed(source, seed),
        None => BatchCursor::new(source),
    }
}
