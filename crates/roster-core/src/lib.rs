//! roster-core: face enrollment, encoding aggregation and recognition.
//!
//! Pipeline: frame → [`EmbeddingOracle`] → [`Augmenter`] → per-person sample
//! directory → [`aggregator`] → [`EncodingStore`] → [`EuclideanMatcher`].

pub mod aggregator;
pub mod augment;
pub mod detector;
pub mod enrollment;
pub mod matcher;
pub mod oracle;
pub mod recognizer;
pub mod sample;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{compute_encodings, mean_embedding, save_encodings, train, EncodingMap, TrainError};
pub use augment::{AugmentConfig, Augmenter, DEFAULT_BLUR_PROBABILITY, DEFAULT_ROTATION_DEGREES};
pub use enrollment::{EnrollProgress, EnrollmentService, EnrollmentSettings, TrainingStatus, DEFAULT_QUOTA};
pub use matcher::{
    recognize_frame, EuclideanMatcher, FaceMatch, Identification, Matcher, DEFAULT_TOLERANCE,
    UNKNOWN_IDENTITY,
};
pub use oracle::{EmbeddingOracle, OnnxOracle, OracleError};
pub use session::{EnrollError, FrameProgress, RegistrationTracker, FACE_CROP_SIZE};
pub use store::{EncodingStore, StoreError};
pub use types::{BoundingBox, Embedding};

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/roster/models")
}
