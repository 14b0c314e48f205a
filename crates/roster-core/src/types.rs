use serde::{Deserialize, Serialize};

/// Face bounding box in pixel coordinates of the image it was detected in.
///
/// Field order follows the (top, right, bottom, left) convention used by the
/// embedding oracle. Coordinates may lie outside the image; use
/// [`clamp_to`](Self::clamp_to) before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Box covering a whole `width`×`height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, width as i32, height as i32, 0)
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Intersect with the `width`×`height` image rectangle.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as i32;
        let h = height as i32;
        Self {
            top: self.top.clamp(0, h),
            right: self.right.clamp(0, w),
            bottom: self.bottom.clamp(0, h),
            left: self.left.clamp(0, w),
        }
    }
}

/// Face embedding vector. Dimensionality is fixed by the oracle that produced it.
///
/// Serializes as a bare array of floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    /// Only meaningful for equal dimensions; extra components are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}
