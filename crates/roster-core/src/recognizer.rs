//! ArcFace face recognizer via ONNX Runtime.
//!
//! Crops a detected face, resizes it to the 112×112 model input and returns
//! an L2-normalized 512-dimensional embedding (w600k_r50).

use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric: maps [0, 255] onto [-1, 1]
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed the face inside `face`. Returns `None` if the box lies outside the frame.
    pub fn extract(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, RecognizerError> {
        let Some(input) = preprocess(frame, face) else {
            return Ok(None);
        };

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Some(Embedding::new(l2_normalize(raw))))
    }
}

/// Crop, resize and normalize a face into a 1×3×112×112 tensor.
fn preprocess(frame: &RgbImage, face: &BoundingBox) -> Option<Array4<f32>> {
    let region = face.clamp_to(frame.width(), frame.height());
    if region.is_empty() {
        return None;
    }

    let crop = imageops::crop_imm(
        frame,
        region.left as u32,
        region.top as u32,
        region.width() as u32,
        region.height() as u32,
    )
    .to_image();
    let resized = imageops::resize(&crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);

    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    Some(tensor)
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
