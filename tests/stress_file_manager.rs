//! End-to-end tests for the file-backed face data manager
//!
//! Run with: cargo test --test stress_file_manager -- --nocapture

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use facedata_core::adapters::ImageOptions;
use facedata_core::data::{CacheSizes, ServeOrder, Split};
use facedata_core::{face_data_manager, DataConfig, DataError, DataManager};
use image::{Rgb, RgbImage};

/// Write `count` solid-color PNGs; pixel value encodes the file index
fn write_faces(dir: &Path, count: usize) {
    for i in 0..count {
        let shade = (i * 10) as u8;
        RgbImage::from_pixel(24, 18, Rgb([shade, shade, shade]))
            .save(dir.join(format!("{:03}.png", i)))
            .unwrap();
    }
}

fn small_config(dir: &Path, batch_size: usize, cache_sizes: CacheSizes) -> DataConfig {
    DataConfig {
        batch_size,
        cache_sizes,
        file_dirs: vec![dir.to_path_buf()],
        seed: Some(17),
        serve_order: ServeOrder::Fifo,
        image: ImageOptions {
            width: 8,
            height: 8,
            force_grayscale: true,
        },
        ..Default::default()
    }
}

#[test]
fn test_batches_have_configured_shape() {
    let dir = tempfile::tempdir().unwrap();
    write_faces(dir.path(), 20);
    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let config = small_config(dir.path(), 4, CacheSizes::new(3, 2, 1));
    let mut manager = face_data_manager(&config).unwrap();
    assert_eq!(manager.partition().len(), 20);

    for _ in 0..10 {
        let batch = manager.train_batch().unwrap();
        assert_eq!(batch.shape(), &[4, 8, 8]);
    }
    assert_eq!(manager.valid_batch().unwrap().shape(), &[4, 8, 8]);
    assert_eq!(manager.test_batch().unwrap().shape(), &[4, 8, 8]);

    let metrics = manager.metrics();
    assert_eq!(metrics.files_skipped.get(), 0);
    assert!(metrics.batches_served.get() >= 12);
}

#[test]
fn test_splits_are_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    write_faces(dir.path(), 30);

    let config = small_config(dir.path(), 2, CacheSizes::synchronous());
    let manager = face_data_manager(&config).unwrap();
    let train: HashSet<_> = manager.split_paths(Split::Train).into_iter().collect();
    let valid: HashSet<_> = manager.split_paths(Split::Valid).into_iter().collect();
    let test: HashSet<_> = manager.split_paths(Split::Test).into_iter().collect();

    assert_eq!(train.len(), 24);
    assert_eq!(valid.len(), 3);
    assert_eq!(test.len(), 3);
    assert!(train.is_disjoint(&valid));
    assert!(train.is_disjoint(&test));
    assert!(valid.is_disjoint(&test));
}

#[test]
fn test_corrupt_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_faces(dir.path(), 40);
    for i in 0..2 {
        fs::write(dir.path().join(format!("corrupt_{}.png", i)), b"garbage").unwrap();
    }

    let config = small_config(dir.path(), 5, CacheSizes::synchronous());
    let mut manager = face_data_manager(&config).unwrap();
    // enough draws per split to visit every file at least once
    for _ in 0..10 {
        assert_eq!(manager.train_batch().unwrap().shape()[0], 5);
    }
    for _ in 0..3 {
        assert_eq!(manager.valid_batch().unwrap().shape()[0], 5);
        assert_eq!(manager.test_batch().unwrap().shape()[0], 5);
    }

    let metrics = manager.metrics();
    assert!(metrics.files_skipped.get() >= 2);
    assert!(metrics.recent_skips().iter().all(|reason| reason.contains("corrupt_")));
}

#[test]
fn test_unreadable_split_exhausts() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..10 {
        fs::write(dir.path().join(format!("{}.png", i)), b"not an image").unwrap();
    }

    let config = small_config(dir.path(), 2, CacheSizes::synchronous());
    let mut manager = face_data_manager(&config).unwrap();
    assert!(matches!(
        manager.train_batch(),
        Err(DataError::BatchExhausted { requested: 2, got: 0, .. })
    ));
}

#[test]
fn test_too_few_files_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_faces(dir.path(), 5);

    let err = face_data_manager(&small_config(dir.path(), 2, CacheSizes::synchronous()))
        .err()
        .unwrap();
    assert!(err.is_config_error());
}

#[test]
fn test_prefetching_serves_many_batches() {
    let dir = tempfile::tempdir().unwrap();
    write_faces(dir.path(), 40);

    let config = small_config(dir.path(), 8, CacheSizes::new(4, 2, 2));
    let mut manager = face_data_manager(&config).unwrap();
    for _ in 0..25 {
        manager.train_batch().unwrap();
    }
    assert!(manager.cache(Split::Train).rounds() >= 6);
    assert!(manager.metrics().current_epoch.get() >= 1);
    println!("{}", manager.metrics().export());
}
