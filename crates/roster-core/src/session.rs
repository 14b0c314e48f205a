//! Registration sessions: per-person progress toward a sample quota.
//!
//! Sessions live for the lifetime of the process only. Updates for the same
//! person are serialized by a per-person lock; different people proceed
//! independently.

use crate::augment::Augmenter;
use crate::oracle::{EmbeddingOracle, OracleError};
use crate::sample::{align_face, validate_person_name, FaceSample, SampleError};
use chrono::Local;
use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Edge length of stored face crops, in pixels.
pub const FACE_CROP_SIZE: u32 = 160;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("quota must be at least 1")]
    ZeroQuota,
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Result of one `submit_frame` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameProgress {
    pub face_detected: bool,
    /// Samples written by this call.
    pub saved: usize,
    /// Running total for the person after this call.
    pub total: usize,
    pub quota: usize,
}

impl FrameProgress {
    pub fn is_complete(&self) -> bool {
        self.total >= self.quota
    }
}

type Counter = Arc<Mutex<usize>>;

pub struct RegistrationTracker {
    sample_root: PathBuf,
    augmenter: Augmenter,
    crop_size: u32,
    sessions: Mutex<HashMap<String, Counter>>,
}

impl RegistrationTracker {
    pub fn new(sample_root: impl Into<PathBuf>, augmenter: Augmenter) -> Self {
        Self {
            sample_root: sample_root.into(),
            augmenter,
            crop_size: FACE_CROP_SIZE,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_crop_size(mut self, crop_size: u32) -> Self {
        self.crop_size = crop_size.max(1);
        self
    }

    pub fn sample_root(&self) -> &Path {
        &self.sample_root
    }

    /// Run detection on `frame`, augment the first face and store variants
    /// until `person` reaches `quota`.
    ///
    /// A frame without faces leaves the total unchanged. Additional faces are
    /// ignored. The total never decreases and never exceeds `quota`.
    pub fn submit_frame<O>(
        &self,
        oracle: &mut O,
        person: &str,
        frame: &RgbImage,
        quota: usize,
    ) -> Result<FrameProgress, EnrollError>
    where
        O: EmbeddingOracle + ?Sized,
    {
        validate_person_name(person)?;
        if quota == 0 {
            return Err(EnrollError::ZeroQuota);
        }

        let counter = self.counter(person);
        let mut total = counter.lock().unwrap_or_else(PoisonError::into_inner);
        let prior = *total;

        let faces = oracle.detect(frame)?;
        let Some(face) = faces.first() else {
            tracing::debug!(person, total = prior, "no face detected in frame");
            return Ok(FrameProgress {
                face_detected: false,
                saved: 0,
                total: prior,
                quota,
            });
        };
        if faces.len() > 1 {
            tracing::warn!(person, faces = faces.len(), "multiple faces in enrollment frame; using the first");
        }

        let crop = align_face(frame, face, self.crop_size)?;
        let variants = self.augmenter.augment(&crop);
        let person_dir = self.sample_root.join(person);
        let captured_at = Local::now();

        let mut saved = 0;
        for (variant, crop) in variants.into_iter().enumerate() {
            if prior + saved >= quota {
                break;
            }
            let sample = FaceSample {
                person: person.to_string(),
                index: prior + saved,
                variant,
                captured_at,
                crop,
            };
            if let Err(e) = sample.save(&person_dir) {
                *total = prior + saved;
                return Err(e.into());
            }
            saved += 1;
        }

        *total = prior + saved;
        tracing::info!(person, saved, total = *total, quota, "enrollment frame processed");
        Ok(FrameProgress {
            face_detected: true,
            saved,
            total: *total,
            quota,
        })
    }

    /// Samples collected so far for `person` in the current session.
    ///
    /// Waits for any in-flight frame for `person`, but not for other people.
    pub fn collected(&self, person: &str) -> usize {
        let counter = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(person)
            .cloned();
        counter.map_or(0, |c| *c.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drop the session for `person`; a later call starts again from zero.
    pub fn discard(&self, person: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(person)
            .is_some();
        if removed {
            tracing::debug!(person, "registration session discarded");
        }
        removed
    }

    /// Names with an in-flight session, sorted.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn counter(&self, person: &str) -> Counter {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.entry(person.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::AugmentConfig;
    use crate::sample::is_sample_image;
    use crate::testing::{frame, StubOracle};
    use image::Rgb;
    use std::fs;

    fn four_variants() -> Augmenter {
        Augmenter::new(AugmentConfig {
            blur_probability: 0.0,
            ..Default::default()
        })
    }

    fn files_in(dir: &Path) -> usize {
        fs::read_dir(dir)
            .map(|rd| rd.filter_map(Result::ok).filter(|e| is_sample_image(&e.path())).count())
            .unwrap_or(0)
    }

    #[test]
    fn test_totals_monotonic_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let mut oracle = StubOracle::default();
        let face = frame(Rgb([120, 80, 60]));

        let totals: Vec<usize> = (0..4)
            .map(|_| tracker.submit_frame(&mut oracle, "Alice", &face, 10).unwrap().total)
            .collect();
        assert_eq!(totals, vec![4, 8, 10, 10]);
        assert_eq!(files_in(&dir.path().join("Alice")), 10);
    }

    #[test]
    fn test_partial_batch_on_final_frame() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let mut oracle = StubOracle::default();
        let face = frame(Rgb([120, 80, 60]));

        tracker.submit_frame(&mut oracle, "Alice", &face, 6).unwrap();
        let last = tracker.submit_frame(&mut oracle, "Alice", &face, 6).unwrap();
        assert_eq!(last.saved, 2);
        assert!(last.is_complete());
    }

    #[test]
    fn test_no_face_leaves_total_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let mut oracle = StubOracle::default();

        tracker.submit_frame(&mut oracle, "Bob", &frame(Rgb([1, 2, 3])), 50).unwrap();
        let p = tracker.submit_frame(&mut oracle, "Bob", &frame(StubOracle::NO_FACE), 50).unwrap();
        assert!(!p.face_detected);
        assert_eq!(p.saved, 0);
        assert_eq!(p.total, 4);
        assert_eq!(tracker.collected("Bob"), 4);
    }

    #[test]
    fn test_only_first_face_counts() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let mut oracle = StubOracle { faces_per_frame: 3, ..Default::default() };
        let p = tracker.submit_frame(&mut oracle, "Carol", &frame(Rgb([9, 9, 9])), 50).unwrap();
        assert_eq!(p.saved, 4);
        assert_eq!(p.total, 4);
    }

    #[test]
    fn test_samples_are_fixed_size() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        tracker
            .submit_frame(&mut StubOracle::default(), "Dana", &frame(Rgb([50, 60, 70])), 4)
            .unwrap();
        for entry in fs::read_dir(dir.path().join("Dana")).unwrap() {
            let img = image::open(entry.unwrap().path()).unwrap();
            assert_eq!((img.width(), img.height()), (FACE_CROP_SIZE, FACE_CROP_SIZE));
        }
    }

    #[test]
    fn test_invalid_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let mut oracle = StubOracle::default();
        let face = frame(Rgb([1, 2, 3]));
        assert!(matches!(
            tracker.submit_frame(&mut oracle, "", &face, 5),
            Err(EnrollError::Sample(SampleError::InvalidName(_)))
        ));
        assert!(matches!(
            tracker.submit_frame(&mut oracle, "Eve", &face, 0),
            Err(EnrollError::ZeroQuota)
        ));
        assert!(tracker.active_sessions().is_empty());
    }

    #[test]
    fn test_oracle_failure_propagates_without_progress() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let mut oracle = StubOracle { unavailable: true, ..Default::default() };
        let err = tracker
            .submit_frame(&mut oracle, "Frank", &frame(Rgb([1, 2, 3])), 5)
            .unwrap_err();
        assert!(matches!(err, EnrollError::Oracle(_)));
        assert_eq!(tracker.collected("Frank"), 0);
    }

    #[test]
    fn test_discard_resets_session() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        tracker
            .submit_frame(&mut StubOracle::default(), "Gus", &frame(Rgb([1, 2, 3])), 50)
            .unwrap();
        assert_eq!(tracker.active_sessions(), vec!["Gus".to_string()]);
        assert!(tracker.discard("Gus"));
        assert_eq!(tracker.collected("Gus"), 0);
        assert!(!tracker.discard("Gus"));
    }

    #[test]
    fn test_waiting_on_one_person_does_not_block_others() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let tracker = RegistrationTracker::new(dir.path(), four_variants());
        let tracker = &tracker;

        std::thread::scope(|s| {
            let (held_tx, held_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel::<()>();
            s.spawn(move || {
                let counter = tracker.counter("Ann");
                let _busy = counter.lock().unwrap();
                held_tx.send(()).unwrap();
                let _ = release_rx.recv();
            });
            held_rx.recv().unwrap();

            s.spawn(move || tracker.collected("Ann"));
            std::thread::sleep(Duration::from_millis(50));

            let (done_tx, done_rx) = mpsc::channel();
            s.spawn(move || {
                let mut oracle = StubOracle::default();
                let total = tracker
                    .submit_frame(&mut oracle, "Bob", &frame(Rgb([5, 5, 5])), 10)
                    .map(|p| p.total);
                let _ = done_tx.send(total.is_ok_and(|t| t == 4));
            });
            let bob = done_rx.recv_timeout(Duration::from_secs(5));
            release_tx.send(()).unwrap();
            assert_eq!(bob, Ok(true));
        });
    }

    #[test]
    fn test_concurrent_submissions_respect_quota() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(RegistrationTracker::new(dir.path(), Augmenter::default()));
        let quota = 23;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let mut oracle = StubOracle::default();
                    let mut last = 0;
                    for _ in 0..5 {
                        let p = tracker
                            .submit_frame(&mut oracle, "Hana", &frame(Rgb([7, 7, 7])), quota)
                            .unwrap();
                        assert!(p.total >= last && p.total <= quota);
                        last = p.total;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tracker.collected("Hana"), quota);
        assert_eq!(files_in(&dir.path().join("Hana")), quota);
    }
}
