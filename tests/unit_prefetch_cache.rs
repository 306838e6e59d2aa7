//! Unit tests for prefetch cache refill accounting and ordering

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use facedata_core::data::{Loader, PrefetchCache, ServeOrder, TaskState};

fn counting_loader(calls: Arc<AtomicUsize>) -> Loader<usize> {
    Box::new(move || Ok(calls.fetch_add(1, Ordering::SeqCst)))
}

#[test]
fn test_depth_one_calls_loader_once_per_get() {
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone());
    let mut cache = PrefetchCache::new("train", loader, 1, ServeOrder::Fifo).unwrap();
    for n in 1..=20 {
        cache.get().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), n);
    }
}

#[test]
fn test_two_refill_rounds_per_2d_gets() {
    for depth in 2..=6usize {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls);
        let mut cache = PrefetchCache::new("train", loader, depth, ServeOrder::Fifo).unwrap();
        let mut rounds = vec![cache.rounds()];
        for _ in 0..(8 * depth) {
            cache.get().unwrap();
            rounds.push(cache.rounds());
        }

        // the first 2D gets span the construction round and one refill
        assert_eq!(rounds[2 * depth], 2);

        // every later window of 2D consecutive gets joins exactly two workers
        for start in 2..=(rounds.len() - 2 * depth) {
            let window = rounds[start + 2 * depth - 1] - rounds[start - 1];
            assert!(
                window == 2,
                "depth {} window at {} saw {} rounds",
                depth,
                start,
                window
            );
        }
    }
}

#[test]
fn test_loader_calls_match_rounds() {
    let depth = 4;
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone());
    let mut cache = PrefetchCache::new("valid", loader, depth, ServeOrder::Fifo).unwrap();
    for _ in 0..(3 * depth) {
        cache.get().unwrap();
    }
    // wait for the in-flight worker so its calls are counted
    while cache.worker_state() == TaskState::Running {
        thread::sleep(Duration::from_millis(1));
    }
    let expected = depth + depth * cache.rounds() as usize;
    assert_eq!(calls.load(Ordering::SeqCst), expected);
}

#[test]
fn test_ready_buffer_never_blocks() {
    let depth = 3;
    let slow: Loader<u64> = Box::new(|| {
        thread::sleep(Duration::from_millis(20));
        Ok(1)
    });
    let mut cache = PrefetchCache::new("test", slow, depth, ServeOrder::Lifo).unwrap();
    assert_eq!(cache.ready(), depth);

    // buffered results come back while the worker is still sleeping
    for remaining in (0..depth).rev() {
        cache.get().unwrap();
        assert_eq!(cache.ready(), remaining);
    }
    assert_eq!(cache.rounds(), 1);
}

#[test]
fn test_lifo_order_across_rounds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut cache =
        PrefetchCache::new("lifo", counting_loader(calls), 4, ServeOrder::Lifo).unwrap();
    let served: Vec<usize> = (0..12).map(|_| cache.get().unwrap()).collect();

    // rounds are served in production order, items within a round reversed
    assert_eq!(served, vec![3, 2, 1, 0, 7, 6, 5, 4, 11, 10, 9, 8]);
}
