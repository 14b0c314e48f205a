//! Face samples: fixed-size face crops stored one file per sample under a
//! per-person directory of the sample root.

use crate::types::BoundingBox;
use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Image extensions recognised as samples (compared case-insensitively).
pub const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("face region {0:?} is empty after clipping to the frame")]
    EmptyCrop(BoundingBox),
    #[error("invalid person name {0:?}")]
    InvalidName(String),
    #[error("failed to write sample {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to create sample directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Reject names that are empty or would escape the sample root when used as a
/// directory name.
pub fn validate_person_name(name: &str) -> Result<(), SampleError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(SampleError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Crop `face` out of `frame` and resize it to `size`×`size`.
pub fn align_face(frame: &RgbImage, face: &BoundingBox, size: u32) -> Result<RgbImage, SampleError> {
    let region = face.clamp_to(frame.width(), frame.height());
    if region.is_empty() {
        return Err(SampleError::EmptyCrop(*face));
    }
    let crop = imageops::crop_imm(
        frame,
        region.left as u32,
        region.top as u32,
        region.width() as u32,
        region.height() as u32,
    )
    .to_image();
    Ok(imageops::resize(&crop, size, size, FilterType::Triangle))
}

/// Whether `path` has one of the [`SAMPLE_EXTENSIONS`].
pub fn is_sample_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SAMPLE_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// One augmented face crop belonging to a person.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub person: String,
    /// Running per-person index; strictly increasing across a session.
    pub index: usize,
    /// Position of this crop in its augmentation batch (0 = unmodified).
    pub variant: usize,
    pub captured_at: DateTime<Local>,
    pub crop: RgbImage,
}

impl FaceSample {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.png",
            self.person,
            self.index,
            self.captured_at.format("%Y%m%d_%H%M%S_%6f"),
            self.variant
        )
    }

    /// Write the crop into `dir`, creating it if needed. Returns the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, SampleError> {
        std::fs::create_dir_all(dir).map_err(|source| SampleError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(self.file_name());
        self.crop.save(&path).map_err(|source| SampleError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "sample saved");
        Ok(path)
    }
}
