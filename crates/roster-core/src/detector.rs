//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 model input, decodes the three
//! anchor-free stride heads and suppresses overlaps with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face with its detector score.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Float-precision box in frame coordinates, used before rounding.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    fn into_detection(self) -> Detection {
        Detection {
            bbox: BoundingBox::new(
                self.y1.round() as i32,
                self.x2.round() as i32,
                self.y2.round() as i32,
                self.x1.round() as i32,
            ),
            confidence: self.score,
        }
    }
}

/// Scale and padding applied when letterboxing into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn for_frame(width: u32, height: u32) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32)
            .min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = Self::scaled_dims(width, height, scale);
        Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        (w, h)
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices (score, bbox) for one stride.
type HeadIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [HeadIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let heads = head_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?heads,
            "loaded SCRFD model"
        );

        Ok(Self { session, heads })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::InvalidFrame { width, height });
        }

        let letterbox = Letterbox::for_frame(width, height);
        let input = preprocess(frame, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(self.heads.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, deltas, stride, &letterbox));
        }

        let detections: Vec<Detection> = nms(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(Candidate::into_detection)
            .filter(|d| !d.bbox.clamp_to(width, height).is_empty())
            .collect();
        tracing::debug!(faces = detections.len(), "SCRFD detection complete");
        Ok(detections)
    }
}

/// Resolve score/bbox heads by name ("score_8", "bbox_8", ...), falling back to
/// the standard positional export layout `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn head_indices(names: &[String]) -> [HeadIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in named.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => *slot = (s, b),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    named
}

/// Letterbox `frame` into an NCHW tensor. Padding uses the mean so it normalizes to 0.
fn preprocess(frame: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let (new_w, new_h) = Letterbox::scaled_dims(frame.width(), frame.height(), letterbox.scale);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    tensor
}

/// Decode one stride level into frame-space candidates above the score threshold.
fn decode_stride(
    scores: &[f32],
    deltas: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let d = deltas.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);
            Some(Candidate { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if kept.iter().all(|k| k.iou(&c) <= iou_threshold) {
            kept.push(c);
        }
    }
    kept
}
