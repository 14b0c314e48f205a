//! Test doubles shared by the unit tests.

use crate::oracle::{EmbeddingOracle, OracleError};
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Deterministic stand-in for the detection/embedding models.
///
/// The first face always covers the whole frame; extra faces are small boxes
/// in the top-left corner. The embedding is the region's mean colour scaled
/// to `[0, 1]`, so similar-looking crops land close together.
#[derive(Debug)]
pub struct StubOracle {
    pub faces_per_frame: usize,
    pub unavailable: bool,
    pub detect_calls: usize,
    pub embed_calls: usize,
}

impl StubOracle {
    /// Frames whose top-left pixel has this colour contain no face.
    pub const NO_FACE: Rgb<u8> = Rgb([13, 17, 19]);
    /// Frames whose top-left pixel has this colour make detection fail.
    pub const FAILS: Rgb<u8> = Rgb([19, 17, 13]);
}

impl Default for StubOracle {
    fn default() -> Self {
        Self {
            faces_per_frame: 1,
            unavailable: false,
            detect_calls: 0,
            embed_calls: 0,
        }
    }
}

impl EmbeddingOracle for StubOracle {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, OracleError> {
        self.detect_calls += 1;
        if self.unavailable {
            return Err(OracleError::Unavailable("stub models not loaded".into()));
        }
        match image.get_pixel_checked(0, 0) {
            None => return Ok(vec![]),
            Some(p) if *p == Self::NO_FACE => return Ok(vec![]),
            Some(p) if *p == Self::FAILS => {
                return Err(OracleError::InferenceFailed("stub failure".into()))
            }
            Some(_) => {}
        }
        let (w, h) = image.dimensions();
        let mut faces = vec![BoundingBox::full(w, h)];
        for i in 1..self.faces_per_frame {
            let edge = (w.min(h) as i32 / 4).max(1);
            let offset = i as i32;
            faces.push(BoundingBox::new(offset, offset + edge, offset + edge, offset));
        }
        Ok(faces)
    }

    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, OracleError> {
        self.embed_calls += 1;
        if self.unavailable {
            return Err(OracleError::Unavailable("stub models not loaded".into()));
        }
        let region = face.clamp_to(image.width(), image.height());
        if region.is_empty() {
            return Ok(None);
        }
        let mut sums = [0.0f64; 3];
        for y in region.top..region.bottom {
            for x in region.left..region.right {
                let p = image.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    sums[c] += p[c] as f64;
                }
            }
        }
        let n = region.area() as f64 * 255.0;
        Ok(Some(Embedding::new(sums.iter().map(|s| (s / n) as f32).collect())))
    }
}

/// Uniform RGB frame.
pub fn frame(color: Rgb<u8>) -> RgbImage {
    RgbImage::from_pixel(64, 48, color)
}

/// Write a uniform 16×16 PNG sample to `root/person/file_name`.
pub fn write_sample(root: &Path, person: &str, file_name: &str, color: Rgb<u8>) -> PathBuf {
    let dir = root.join(person);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file_name);
    RgbImage::from_pixel(16, 16, color)
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}
