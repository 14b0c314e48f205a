//! Embedding oracle: the detection + embedding capability the pipeline consumes.
//!
//! The pipeline never looks inside the oracle. [`OnnxOracle`] is the production
//! adapter (SCRFD detection, ArcFace embedding); tests plug in stubs.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    /// The oracle cannot serve any request (models missing, runtime down).
    #[error("embedding oracle unavailable: {0}")]
    Unavailable(String),
    /// The oracle failed on this particular image.
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OracleError {
    /// Whether the failure affects every subsequent call, not just this image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OracleError::Unavailable(_))
    }
}

impl From<DetectorError> for OracleError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(_) => OracleError::Unavailable(e.to_string()),
            DetectorError::InvalidFrame { .. } => OracleError::InvalidInput(e.to_string()),
            DetectorError::InferenceFailed(_) | DetectorError::Ort(_) => {
                OracleError::InferenceFailed(e.to_string())
            }
        }
    }
}

impl From<RecognizerError> for OracleError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(_) => OracleError::Unavailable(e.to_string()),
            RecognizerError::InferenceFailed(_) | RecognizerError::Ort(_) => {
                OracleError::InferenceFailed(e.to_string())
            }
        }
    }
}

/// Detection and embedding of faces in an RGB image.
///
/// `detect` returns boxes in the oracle's native order; callers that apply a
/// first-face policy rely on that order being stable. Implementations may keep
/// inference state, hence `&mut self`.
pub trait EmbeddingOracle {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, OracleError>;

    /// Embed the face inside `face`. `Ok(None)` means the region yielded no
    /// usable face (e.g. it was clipped away entirely).
    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, OracleError>;
}

impl<O: EmbeddingOracle + ?Sized> EmbeddingOracle for Box<O> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, OracleError> {
        (**self).detect(image)
    }

    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, OracleError> {
        (**self).embed(image, face)
    }
}

/// SCRFD detector + ArcFace recognizer running on ONNX Runtime.
pub struct OnnxOracle {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxOracle {
    /// SCRFD model file name inside the model directory.
    pub const DETECTOR_MODEL: &'static str = "det_10g.onnx";
    /// ArcFace model file name inside the model directory.
    pub const RECOGNIZER_MODEL: &'static str = "w600k_r50.onnx";
    /// Match tolerance for the unit-length ArcFace embeddings this oracle
    /// returns. For unit vectors `d² = 2 - 2·cos`, so `d < 1.0` is
    /// `cos > 0.5`, and every accepted match also gets a non-zero confidence.
    pub const DEFAULT_TOLERANCE: f32 = 1.0;

    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, OracleError> {
        let detector = FaceDetector::load(&model_dir.join(Self::DETECTOR_MODEL))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(Self::RECOGNIZER_MODEL))?;
        tracing::info!(model_dir = %model_dir.display(), "embedding oracle ready");
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingOracle for OnnxOracle {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, OracleError> {
        let detections = self.detector.detect(image)?;
        Ok(detections.into_iter().map(|d| d.bbox).collect())
    }

    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, OracleError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_models_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxOracle::load(dir.path()).err().unwrap();
        assert!(err.is_fatal(), "got {err}");
    }

    #[test]
    fn test_inference_failure_is_not_fatal() {
        let err: OracleError = DetectorError::InferenceFailed("scores".into()).into();
        assert!(!err.is_fatal());
        let err: OracleError = RecognizerError::InferenceFailed("dim".into()).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_invalid_frame_maps_to_invalid_input() {
        let err: OracleError = DetectorError::InvalidFrame { width: 0, height: 4 }.into();
        assert!(matches!(err, OracleError::InvalidInput(_)));
    }

    #[test]
    fn test_default_tolerance_tracks_cosine_similarity() {
        use crate::matcher::{EuclideanMatcher, Matcher};
        use crate::store::EncodingStore;

        // Unit vectors at a chosen cosine similarity to the x axis.
        let unit = |cos: f32| Embedding::new(vec![cos, (1.0 - cos * cos).sqrt()]);
        let store: EncodingStore = [("Alice".to_string(), Embedding::new(vec![1.0, 0.0]))]
            .into_iter()
            .collect();
        let matcher = EuclideanMatcher::new(OnnxOracle::DEFAULT_TOLERANCE);

        let same = matcher.identify(&unit(0.7), &store);
        assert_eq!(same.name, "Alice");
        assert!(same.confidence > 0.0);

        let other = matcher.identify(&unit(0.3), &store);
        assert!(!other.is_known());
    }
}
