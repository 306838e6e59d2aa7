//! Detector-backed face source
//!
//! Datasets without face annotations rely on a detector run per image. The
//! detector itself (a cascade classifier, an ONNX model, ...) lives outside
//! this crate behind [`FaceDetector`].

use image::{DynamicImage, RgbImage};

use super::{FaceRect, FaceSource};
use crate::error::Result;

/// Finds faces in an RGB image
pub trait FaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRect>>;
}

/// [`FaceSource`] that runs a detector over every `.png` image
pub struct DetectorSource<D> {
    detector: D,
}

impl<D: FaceDetector> DetectorSource<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }
}

impl<D: FaceDetector> FaceSource for DetectorSource<D> {
    fn accepts(&self, file_name: &str) -> bool {
        file_name.ends_with(".png")
    }

    fn faces(&self, _file_name: &str, image: &DynamicImage) -> Result<Vec<FaceRect>> {
        self.detector.detect(&image.to_rgb8())
    }
}
