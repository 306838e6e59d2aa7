//! Data loading pipeline
//!
//! Batch cursors, split partitioning and single-worker prefetch caches.

pub mod cursor;
pub mod manager;
pub mod partition;
pub mod prefetcher;

pub use cursor::{list_cursor, BatchCursor, DataSource, ListSource};
pub use manager::{
    CacheSizes, CachedDataManager, DataManager, FileBatchReader, FileDataManager, MAX_READ_ATTEMPTS,
};
pub use partition::{
    enumerate_files, FileEntry, FilePartition, Split, SplitBoundaries, SplitFractions,
};
pub use prefetcher::{LoadTask, Loader, PrefetchCache, ServeOrder, TaskState};
