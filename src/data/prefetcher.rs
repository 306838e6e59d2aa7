//! Single-worker prefetch cache
//!
//! Keeps a buffer of precomputed results while one background thread
//! produces the next round, so I/O-bound loading overlaps with whatever the
//! caller does between `get()` calls.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DataError, Result};
use crate::metrics::DataMetrics;

/// Zero-argument producer of one result per call
pub type Loader<T> = Box<dyn FnMut() -> Result<T> + Send>;

/// What a finished worker hands back: the loader it borrowed and its output
type TaskOutput<T> = (Loader<T>, Vec<Result<T>>);

/// Order in which buffered results of one round are served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeOrder {
    /// Production order
    #[default]
    Fifo,
    /// Last produced is served first
    Lifo,
}

/// Observable state of a [`LoadTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No worker in flight
    Idle,
    /// Worker still producing
    Running,
    /// Worker done, waiting to be joined
    Finished,
}

/// Handle to the (at most one) background load of a cache.
///
/// The loader moves into the worker thread on launch and comes back on
/// join, so foreground and background never share mutable state.
pub struct LoadTask<T> {
    count: usize,
    handle: Option<JoinHandle<TaskOutput<T>>>,
    launches: u64,
}

impl<T: Send + 'static> LoadTask<T> {
    /// Task that produces `count` results per launch
    pub fn new(count: usize) -> Self {
        Self {
            count,
            handle: None,
            launches: 0,
        }
    }

    /// Start a worker running `loader` `count` times
    pub fn launch(&mut self, mut loader: Loader<T>) -> Result<()> {
        if self.handle.is_some() {
            return Err(DataError::TaskAlreadyRunning);
        }
        let count = self.count;
        let handle = thread::Builder::new()
            .name("facedata-prefetch".into())
            .spawn(move || {
                let mut results = Vec::with_capacity(count);
                for _ in 0..count {
                    results.push(loader());
                }
                (loader, results)
            })
            .map_err(DataError::WorkerSpawn)?;

        self.handle = Some(handle);
        self.launches += 1;
        Ok(())
    }

    pub fn poll(&self) -> TaskState {
        match &self.handle {
            None => TaskState::Idle,
            Some(handle) if handle.is_finished() => TaskState::Finished,
            Some(_) => TaskState::Running,
        }
    }

    /// Block until the worker finishes and take back its loader and results
    pub fn join(&mut self) -> Result<TaskOutput<T>> {
        let handle = self.handle.take().ok_or(DataError::NoTaskRunning)?;
        handle.join().map_err(|payload| DataError::WorkerPanicked {
            message: panic_message(payload.as_ref()),
        })
    }

    /// Join the current worker, then immediately launch the next one with the
    /// same loader. Returns the joined worker's results.
    pub fn relaunch(&mut self) -> Result<Vec<Result<T>>> {
        let (loader, results) = self.join()?;
        Ok(self.launch_keeping(loader, results))
    }

    /// Launch `loader` without losing `results`: a failed launch is appended
    /// as the last result instead of replacing them.
    fn launch_keeping(&mut self, loader: Loader<T>, mut results: Vec<Result<T>>) -> Vec<Result<T>> {
        if let Err(e) = self.launch(loader) {
            warn!("Prefetch worker not relaunched: {}", e);
            results.push(Err(e));
        }
        results
    }

    /// Number of workers launched so far
    pub fn launches(&self) -> u64 {
        self.launches
    }
}

impl<T> Drop for LoadTask<T> {
    fn drop(&mut self) {
        // no cancellation: an outstanding worker always runs to completion
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum Mode<T> {
    Sync(Loader<T>),
    Prefetch {
        ready: VecDeque<Result<T>>,
        task: LoadTask<T>,
    },
}

/// Double-buffered cache around a [`Loader`].
///
/// With depth ≤ 1 every `get()` calls the loader directly. Otherwise `depth`
/// results are produced up front and a worker starts on the next `depth`;
/// `get()` only blocks when the ready buffer is empty and the worker has to
/// be joined. If a worker panics the cache reports it once and is unusable
/// afterwards.
pub struct PrefetchCache<T> {
    name: String,
    depth: usize,
    order: ServeOrder,
    mode: Mode<T>,
    metrics: Option<Arc<DataMetrics>>,
}

impl<T: Send + 'static> PrefetchCache<T> {
    pub fn new(
        name: impl Into<String>,
        loader: Loader<T>,
        depth: usize,
        order: ServeOrder,
    ) -> Result<Self> {
        Self::build(name.into(), loader, depth, order, None)
    }

    /// Same as [`PrefetchCache::new`], recording refills in `metrics`
    pub fn with_metrics(
        name: impl Into<String>,
        loader: Loader<T>,
        depth: usize,
        order: ServeOrder,
        metrics: Arc<DataMetrics>,
    ) -> Result<Self> {
        Self::build(name.into(), loader, depth, order, Some(metrics))
    }

    fn build(
        name: String,
        mut loader: Loader<T>,
        depth: usize,
        order: ServeOrder,
        metrics: Option<Arc<DataMetrics>>,
    ) -> Result<Self> {
        let mode = if depth <= 1 {
            Mode::Sync(loader)
        } else {
            let ready: VecDeque<Result<T>> = (0..depth).map(|_| loader()).collect();
            let mut task = LoadTask::new(depth);
            task.launch(loader)?;
            if let Some(metrics) = &metrics {
                metrics.refill_rounds.inc();
            }
            Mode::Prefetch { ready, task }
        };
        debug!(cache = %name, depth, ?order, "Prefetch cache ready");

        Ok(Self {
            name,
            depth,
            order,
            mode,
            metrics,
        })
    }

    /// Next result, blocking only when a worker must be joined
    pub fn get(&mut self) -> Result<T> {
        let result = match &mut self.mode {
            Mode::Sync(loader) => loader(),
            Mode::Prefetch { ready, task } => {
                if ready.is_empty() {
                    let start = Instant::now();
                    let results = task.relaunch()?;
                    let waited = start.elapsed();
                    if let Some(metrics) = &self.metrics {
                        metrics.refill_wait.observe(waited.as_secs_f64());
                        metrics.refill_rounds.inc();
                    }
                    debug!(
                        cache = %self.name,
                        round = task.launches(),
                        waited_ms = waited.as_millis() as u64,
                        "Adopted prefetched round"
                    );
                    ready.extend(results);
                }
                let next = match self.order {
                    ServeOrder::Fifo => ready.pop_front(),
                    ServeOrder::Lifo => ready.pop_back(),
                };
                next.unwrap_or(Err(DataError::NoTaskRunning))
            }
        };

        if result.is_ok() {
            if let Some(metrics) = &self.metrics {
                metrics.batches_served.inc();
            }
        }
        result
    }

    /// Results buffered and ready to serve without blocking
    pub fn ready(&self) -> usize {
        match &self.mode {
            Mode::Sync(_) => 0,
            Mode::Prefetch { ready, .. } => ready.len(),
        }
    }

    /// Background rounds launched so far (0 when prefetching is disabled)
    pub fn rounds(&self) -> u64 {
        match &self.mode {
            Mode::Sync(_) => 0,
            Mode::Prefetch { task, .. } => task.launches(),
        }
    }

    /// State of the background worker
    pub fn worker_state(&self) -> TaskState {
        match &self.mode {
            Mode::Sync(_) => TaskState::Idle,
            Mode::Prefetch { task, .. } => task.poll(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_prefetching(&self) -> bool {
        matches!(self.mode, Mode::Prefetch { .. })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn counting_loader(calls: Arc<AtomicUsize>) -> Loader<usize> {
        Box::new(move || Ok(calls.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn test_sync_mode_calls_loader_per_get() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls.clone());
        let mut cache = PrefetchCache::new("sync", loader, 1, ServeOrder::Fifo).unwrap();
        assert!(!cache.is_prefetching());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        for i in 0..5 {
            assert_eq!(cache.get().unwrap(), i);
            assert_eq!(calls.load(Ordering::SeqCst), i + 1);
        }
        assert_eq!(cache.rounds(), 0);
    }

    #[test]
    fn test_zero_depth_is_synchronous() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls.clone());
        let mut cache = PrefetchCache::new("zero", loader, 0, ServeOrder::Fifo).unwrap();
        cache.get().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fifo_serves_production_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache =
            PrefetchCache::new("fifo", counting_loader(calls), 3, ServeOrder::Fifo).unwrap();
        let served: Vec<usize> = (0..9).map(|_| cache.get().unwrap()).collect();
        assert_eq!(served, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_lifo_reverses_within_round() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache =
            PrefetchCache::new("lifo", counting_loader(calls), 3, ServeOrder::Lifo).unwrap();
        let served: Vec<usize> = (0..9).map(|_| cache.get().unwrap()).collect();
        assert_eq!(served, vec![2, 1, 0, 5, 4, 3, 8, 7, 6]);
    }

    #[test]
    fn test_loader_error_is_served_in_place() {
        let mut n = 0;
        let loader: Loader<u32> = Box::new(move || {
            n += 1;
            if n == 2 {
                Err(DataError::EmptySource { requested: 1 })
            } else {
                Ok(n)
            }
        });
        let mut cache = PrefetchCache::new("errors", loader, 2, ServeOrder::Fifo).unwrap();
        assert_eq!(cache.get().unwrap(), 1);
        assert!(matches!(cache.get(), Err(DataError::EmptySource { .. })));
        assert_eq!(cache.get().unwrap(), 3);
    }

    #[test]
    fn test_worker_panic_surfaces_on_join() {
        let mut n = 0;
        let loader: Loader<u32> = Box::new(move || {
            n += 1;
            if n == 3 {
                panic!("decoder blew up");
            }
            Ok(n)
        });
        let mut cache = PrefetchCache::new("panics", loader, 2, ServeOrder::Fifo).unwrap();
        assert_eq!(cache.get().unwrap(), 1);
        assert_eq!(cache.get().unwrap(), 2);
        match cache.get() {
            Err(DataError::WorkerPanicked { message }) => {
                assert!(message.contains("decoder blew up"))
            }
            other => panic!("expected worker panic, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_task_lifecycle() {
        let (tx, rx) = mpsc::channel::<()>();
        let loader: Loader<u8> = Box::new(move || {
            rx.recv().map_err(|_| DataError::NoTaskRunning)?;
            Ok(7)
        });

        let mut task = LoadTask::new(1);
        assert_eq!(task.poll(), TaskState::Idle);
        assert!(matches!(task.join(), Err(DataError::NoTaskRunning)));

        task.launch(loader).unwrap();
        assert_eq!(task.poll(), TaskState::Running);

        let spare: Loader<u8> = Box::new(|| Ok(0));
        assert!(matches!(task.launch(spare), Err(DataError::TaskAlreadyRunning)));

        tx.send(()).unwrap();
        let (_loader, results) = task.join().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 7);
        assert_eq!(task.poll(), TaskState::Idle);
        assert_eq!(task.launches(), 1);
    }

    #[test]
    fn test_relaunch_keeps_single_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut task = LoadTask::new(2);
        task.launch(counting_loader(calls.clone())).unwrap();

        let first: Vec<usize> = task.relaunch().unwrap().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(first, vec![0, 1]);
        assert_ne!(task.poll(), TaskState::Idle);

        let second: Vec<usize> = task.relaunch().unwrap().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(second, vec![2, 3]);
        assert_eq!(task.launches(), 3);
    }

    #[test]
    fn test_metrics_track_rounds_and_batches() {
        let metrics = Arc::new(DataMetrics::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls);
        let mut cache =
            PrefetchCache::with_metrics("metered", loader, 2, ServeOrder::Fifo, metrics.clone())
                .unwrap();
        for _ in 0..5 {
            cache.get().unwrap();
        }
        assert_eq!(metrics.batches_served.get(), 5);
        assert_eq!(metrics.refill_rounds.get(), 3);
        assert_eq!(metrics.refill_wait.count(), 2);
    }

    #[test]
    fn test_failed_relaunch_keeps_results() {
        let (tx, rx) = mpsc::channel::<()>();
        let blocked: Loader<u8> = Box::new(move || {
            rx.recv().map_err(|_| DataError::NoTaskRunning)?;
            Ok(0)
        });
        let mut task = LoadTask::new(1);
        task.launch(blocked).unwrap();

        // the running worker makes the second launch fail
        let spare: Loader<u8> = Box::new(|| Ok(9));
        let results = task.launch_keeping(spare, vec![Ok(1), Ok(2)]);
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert_eq!(*results[1].as_ref().unwrap(), 2);
        assert!(matches!(results[2], Err(DataError::TaskAlreadyRunning)));

        tx.send(()).unwrap();
        assert_eq!(task.launches(), 1);
    }

    #[test]
    fn test_drop_waits_for_inflight_round() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slow: Loader<usize> = Box::new(move || {
            thread::sleep(Duration::from_millis(25));
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });

        let cache = PrefetchCache::new("shutdown", slow, 2, ServeOrder::Fifo).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        drop(cache);

        // the background round ran to completion, it was not cancelled
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
