//! Face-crop image adapter
//!
//! Reads the preprocessed face PNGs, center-crops them to a square, resizes
//! and scales pixel values to `[0, 1]`, optionally collapsing to luma.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::{Array2, Array3, ArrayD};
use serde::{Deserialize, Serialize};

use super::FileAdapter;
use crate::error::{DataError, Result};

/// ITU-R BT.601 luma weights
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Output geometry of decoded face images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    pub width: u32,
    pub height: u32,
    pub force_grayscale: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            force_grayscale: false,
        }
    }
}

/// Largest centered square of `image`
pub fn center_square(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let side = w.min(h);
    let x = w / 2 - side / 2;
    let y = h / 2 - side / 2;
    imageops::crop_imm(image, x, y, side, side).to_image()
}

/// Center-crop, resize and normalise a decoded image
pub fn process_image(image: &DynamicImage, options: &ImageOptions) -> Option<ArrayD<f32>> {
    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return None;
    }
    let square = center_square(&rgb);
    let resized = imageops::resize(&square, options.width, options.height, FilterType::Triangle);

    let rows = options.height as usize;
    let cols = options.width as usize;
    let channel =
        |r: usize, c: usize, ch: usize| resized.get_pixel(c as u32, r as u32)[ch] as f32 / 255.0;

    let array = if options.force_grayscale {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            (0..3).map(|ch| channel(r, c, ch) * LUMA_WEIGHTS[ch]).sum::<f32>()
        })
        .into_dyn()
    } else {
        Array3::from_shape_fn((rows, cols, 3), |(r, c, ch)| channel(r, c, ch)).into_dyn()
    };
    Some(array)
}

/// Adapter for directories of face PNGs
#[derive(Debug, Clone, Default)]
pub struct FaceImageAdapter {
    options: ImageOptions,
}

impl FaceImageAdapter {
    pub fn new(options: ImageOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ImageOptions {
        &self.options
    }
}

impl FileAdapter for FaceImageAdapter {
    fn is_valid_file_name(&self, file_name: &str) -> bool {
        file_name.ends_with(".png")
    }

    fn read_file(&self, path: &Path) -> Result<ArrayD<f32>> {
        let image = image::open(path).map_err(|source| DataError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;
        process_image(&image, &self.options).ok_or_else(|| DataError::InvalidSample {
            path: path.to_path_buf(),
            reason: "image has no pixels".into(),
        })
    }

    fn sample_shape(&self) -> Vec<usize> {
        let rows = self.options.height as usize;
        let cols = self.options.width as usize;
        if self.options.force_grayscale {
            vec![rows, cols]
        } else {
            vec![rows, cols, 3]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::IxDyn;

    #[test]
    fn test_center_square_of_wide_image() {
        let mut image = RgbImage::new(10, 4);
        image.put_pixel(3, 0, Rgb([255, 0, 0]));
        let square = center_square(&image);
        assert_eq!(square.dimensions(), (4, 4));
        // crop starts at x = 5 - 2 = 3
        assert_eq!(square.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_read_file_shapes_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(100, 60, Rgb([255, 0, 0])).save(&path).unwrap();

        let adapter = FaceImageAdapter::default();
        let sample = adapter.read_file(&path).unwrap();
        assert_eq!(sample.shape(), &[64, 64, 3]);
        assert!(sample.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((sample[IxDyn(&[10, 10, 0])] - 1.0).abs() < 0.01);
        assert!(sample[IxDyn(&[10, 10, 1])].abs() < 0.01);

        let gray = FaceImageAdapter::new(ImageOptions {
            width: 32,
            height: 16,
            force_grayscale: true,
        });
        let sample = gray.read_file(&path).unwrap();
        assert_eq!(sample.shape(), gray.sample_shape().as_slice());
        assert!((sample[IxDyn(&[5, 5])] - 0.299).abs() < 0.01);
    }

    #[test]
    fn test_undecodable_file_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let err = FaceImageAdapter::default().read_file(&path).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_file_filter() {
        let adapter = FaceImageAdapter::default();
        assert!(adapter.is_valid_file_name("0001.jpg_0.png"));
        assert!(!adapter.is_valid_file_name("0001.jpg"));
    }
}
