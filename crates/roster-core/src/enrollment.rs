//! Enrollment service: frame-by-frame registration that retrains the encoding
//! store once a person's quota is reached.

use crate::aggregator::{self, TrainError};
use crate::augment::{AugmentConfig, Augmenter};
use crate::oracle::EmbeddingOracle;
use crate::session::{EnrollError, RegistrationTracker, FACE_CROP_SIZE};
use crate::store::EncodingStore;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Default number of augmented samples collected per person.
pub const DEFAULT_QUOTA: usize = 50;

#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub sample_root: PathBuf,
    pub store_path: PathBuf,
    pub quota: usize,
    pub crop_size: u32,
    pub augment: AugmentConfig,
}

impl EnrollmentSettings {
    pub fn new(sample_root: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            sample_root: sample_root.into(),
            store_path: store_path.into(),
            quota: DEFAULT_QUOTA,
            crop_size: FACE_CROP_SIZE,
            augment: AugmentConfig::default(),
        }
    }
}

/// Outcome of the retraining triggered by a completed registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingStatus {
    Success { identities: usize },
    Failed { error: String },
}

/// Progress report returned for every enrollment call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollProgress {
    pub person: String,
    pub samples_collected: usize,
    pub quota: usize,
    pub face_detected: bool,
    pub complete: bool,
    pub message: String,
    /// Present only on the call that completed the registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingStatus>,
}

/// Shared entry point for enrollment requests. `&self` methods make it usable
/// behind an `Arc` from several request handlers.
pub struct EnrollmentService<O> {
    oracle: Mutex<O>,
    tracker: RegistrationTracker,
    store_path: PathBuf,
    quota: usize,
    /// Serializes full retrains so two completions never interleave store writes.
    training: Mutex<()>,
}

impl<O: EmbeddingOracle> EnrollmentService<O> {
    pub fn new(oracle: O, settings: EnrollmentSettings) -> Self {
        let tracker = RegistrationTracker::new(settings.sample_root, Augmenter::new(settings.augment))
            .with_crop_size(settings.crop_size);
        Self {
            oracle: Mutex::new(oracle),
            tracker,
            store_path: settings.store_path,
            quota: settings.quota.max(1),
            training: Mutex::new(()),
        }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn tracker(&self) -> &RegistrationTracker {
        &self.tracker
    }

    /// Process one captured frame for `person`.
    ///
    /// When the quota is reached the encoding store is rebuilt before this
    /// returns. On success the session is discarded; on failure it is kept so
    /// the next call retries training.
    pub fn enroll(&self, person: &str, frame: &RgbImage) -> Result<EnrollProgress, EnrollError> {
        let progress = {
            let mut oracle = self.oracle.lock().unwrap_or_else(PoisonError::into_inner);
            self.tracker.submit_frame(&mut *oracle, person, frame, self.quota)?
        };

        let mut report = EnrollProgress {
            person: person.to_string(),
            samples_collected: progress.total,
            quota: progress.quota,
            face_detected: progress.face_detected,
            complete: progress.is_complete(),
            message: if progress.face_detected {
                format!("Detected and saved {} augmented images.", progress.saved)
            } else {
                "No face detected in the frame.".to_string()
            },
            training: None,
        };

        if !report.complete {
            return Ok(report);
        }

        tracing::info!(person, samples = progress.total, "quota reached; training");
        let status = match self.train() {
            Ok(store) => {
                self.tracker.discard(person);
                report.message = format!(
                    "Finished capturing {} images for {person}. Training complete!",
                    progress.total
                );
                TrainingStatus::Success {
                    identities: store.len(),
                }
            }
            Err(e) => {
                tracing::error!(person, error = %e, "training after enrollment failed");
                report.message = format!(
                    "Finished capturing {} images for {person}. Error during training: {e}",
                    progress.total
                );
                TrainingStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        report.training = Some(status);
        Ok(report)
    }

    /// Rebuild the encoding store from every person's samples.
    pub fn train(&self) -> Result<EncodingStore, TrainError> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);
        let encodings = {
            let mut oracle = self.oracle.lock().unwrap_or_else(PoisonError::into_inner);
            aggregator::compute_encodings(&mut *oracle, self.tracker.sample_root())?
        };
        Ok(aggregator::save_encodings(&encodings, &self.store_path)?)
    }
}
