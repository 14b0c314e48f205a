//! Recognition: nearest stored identity by Euclidean distance, with a
//! distance-derived confidence percentage.

use crate::oracle::{EmbeddingOracle, OracleError};
use crate::store::EncodingStore;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;

/// Label reported when no stored identity is close enough.
pub const UNKNOWN_IDENTITY: &str = "Unknown";
/// Default match threshold; a match requires `distance < tolerance`.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Outcome of matching one live embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    /// Matched person, or [`UNKNOWN_IDENTITY`].
    pub name: String,
    /// `max(0, 1 - distance) * 100`, reported even when `name` is unknown.
    pub confidence: f32,
    /// Distance to the nearest stored identity; `None` if the store was empty.
    pub distance: Option<f32>,
}

impl Identification {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_IDENTITY.to_string(),
            confidence: 0.0,
            distance: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.name != UNKNOWN_IDENTITY
    }
}

/// One recognized face in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub identification: Identification,
}

/// Strategy for identifying a live embedding against the stored identities.
pub trait Matcher {
    fn identify(&self, probe: &Embedding, store: &EncodingStore) -> Identification;
}

/// Euclidean nearest-neighbour matcher with an exclusive distance threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

/// Heuristic, monotonic in distance; not a calibrated probability.
pub fn confidence_from_distance(distance: f32) -> f32 {
    ((1.0 - distance).max(0.0) * 100.0).clamp(0.0, 100.0)
}

impl Matcher for EuclideanMatcher {
    fn identify(&self, probe: &Embedding, store: &EncodingStore) -> Identification {
        let mut best: Option<(&str, f32)> = None;

        // Strict `<` keeps the first-encountered record on ties.
        for (name, embedding) in store.iter() {
            if embedding.dim() != probe.dim() {
                tracing::warn!(
                    name,
                    stored = embedding.dim(),
                    probe = probe.dim(),
                    "embedding dimension mismatch; record skipped"
                );
                continue;
            }
            let distance = probe.euclidean_distance(embedding);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((name, distance));
            }
        }

        let Some((name, distance)) = best else {
            return Identification::unknown();
        };

        let confidence = confidence_from_distance(distance);
        let name = if distance < self.tolerance {
            name
        } else {
            UNKNOWN_IDENTITY
        };
        Identification {
            name: name.to_string(),
            confidence,
            distance: Some(distance),
        }
    }
}

/// Detect every face in `frame` and identify each one independently.
///
/// A face the oracle cannot embed is reported as unknown with zero confidence.
pub fn recognize_frame<O, M>(
    oracle: &mut O,
    matcher: &M,
    store: &EncodingStore,
    frame: &RgbImage,
) -> Result<Vec<FaceMatch>, OracleError>
where
    O: EmbeddingOracle + ?Sized,
    M: Matcher + ?Sized,
{
    let faces = oracle.detect(frame)?;
    let mut matches = Vec::with_capacity(faces.len());

    for bbox in faces {
        let identification = match oracle.embed(frame, &bbox)? {
            Some(embedding) => matcher.identify(&embedding, store),
            None => {
                tracing::debug!(?bbox, "face could not be embedded");
                Identification::unknown()
            }
        };
        tracing::debug!(
            ?bbox,
            name = %identification.name,
            confidence = identification.confidence,
            "face identified"
        );
        matches.push(FaceMatch {
            bbox,
            identification,
        });
    }

    Ok(matches)
}
