//! Offline face-crop preprocessing
//!
//! Walks source image directories, asks a [`FaceSource`] where the faces
//! are, and writes one square PNG per face. Failures on a single image or
//! face are logged and counted; the run keeps going.

pub mod aflw;
pub mod detector;

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::adapters::face::center_square;
use crate::error::{DataError, Result};

pub use aflw::AflwMetadata;
pub use detector::{DetectorSource, FaceDetector};

/// Face bounding box in pixel coordinates; `x` / `y` may be negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl FaceRect {
    pub fn new(x: i64, y: i64, w: i64, h: i64) -> Self {
        Self { x, y, w, h }
    }
}

/// Where the faces of an image are
pub trait FaceSource {
    /// Whether `file_name` should be processed at all
    fn accepts(&self, file_name: &str) -> bool;

    /// Face rectangles for one decoded image
    fn faces(&self, file_name: &str, image: &DynamicImage) -> Result<Vec<FaceRect>>;
}

/// Crop `rect` out of `image`, square it around its center and resize to
/// `size × size`. Grayscale sources come out as three equal channels.
pub fn crop_face(image: &DynamicImage, rect: FaceRect, size: u32) -> Option<RgbImage> {
    let rgb = image.to_rgb8();
    let (img_w, img_h) = (rgb.width() as i64, rgb.height() as i64);

    // the origin is clamped but the extent is kept, as the metadata expects
    let x0 = rect.x.max(0);
    let y0 = rect.y.max(0);
    let x1 = (x0 + rect.w).min(img_w);
    let y1 = (y0 + rect.h).min(img_h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let (w, h) = ((x1 - x0) as u32, (y1 - y0) as u32);
    let face = imageops::crop_imm(&rgb, x0 as u32, y0 as u32, w, h).to_image();
    let square = center_square(&face);
    Some(imageops::resize(&square, size, size, FilterType::Triangle))
}

/// Subdirectories of `root/folder`
pub fn resolve_source_dirs(root: &Path, folder: &str) -> Result<Vec<PathBuf>> {
    let data_dir = root.join(folder);
    let mut dirs = Vec::new();
    for entry in fs::read_dir(&data_dir).map_err(|e| DataError::io(&data_dir, e))? {
        let path = entry.map_err(|e| DataError::io(&data_dir, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Outcome of a preprocessing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub images_seen: usize,
    pub faces_written: usize,
    pub failures: usize,
}

/// Write a face crop for every face `source` reports in `dirs`.
///
/// Output files are named `{file_name}_{i}.png` inside `dest`.
pub fn preprocess_faces(
    dirs: &[PathBuf],
    dest: &Path,
    source: &dyn FaceSource,
    size: u32,
) -> Result<PreprocessReport> {
    fs::create_dir_all(dest).map_err(|e| DataError::io(dest, e))?;
    let mut report = PreprocessReport::default();

    for dir in dirs {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map_err(|e| DataError::io(dir, e))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| source.accepts(name))
            .collect();
        names.sort();

        for name in names {
            let path = dir.join(&name);
            report.images_seen += 1;

            let image = match image::open(&path) {
                Ok(image) => image,
                Err(e) => {
                    warn!("Cannot decode {}: {}", path.display(), e);
                    report.failures += 1;
                    continue;
                }
            };
            let rects = match source.faces(&name, &image) {
                Ok(rects) => rects,
                Err(e) => {
                    warn!("No faces for {}: {}", path.display(), e);
                    report.failures += 1;
                    continue;
                }
            };

            for (i, rect) in rects.into_iter().enumerate() {
                let out = dest.join(format!("{}_{}.png", name, i));
                let saved = match crop_face(&image, rect, size) {
                    Some(face) => face.save(&out).map_err(|e| e.to_string()),
                    None => Err(format!("empty crop {:?}", rect)),
                };
                match saved {
                    Ok(()) => report.faces_written += 1,
                    Err(e) => {
                        error!("Error writing {}: {}", out.display(), e);
                        report.failures += 1;
                    }
                }
            }
        }
    }

    info!(
        images = report.images_seen,
        faces = report.faces_written,
        failures = report.failures,
        dest = %dest.display(),
        "Face preprocessing finished"
    );
    Ok(report)
}
