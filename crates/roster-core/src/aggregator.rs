//! Encoding aggregation ("training"): one representative embedding per person,
//! computed from that person's directory of face samples.

use crate::oracle::{EmbeddingOracle, OracleError};
use crate::sample::is_sample_image;
use crate::store::{EncodingStore, StoreError};
use crate::types::Embedding;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Raw per-sample embeddings, keyed by person name.
pub type EncodingMap = BTreeMap<String, Vec<Embedding>>;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single sample file contributed nothing.
#[derive(Error, Debug)]
enum SkipReason {
    #[error("undecodable image: {0}")]
    Decode(image::ImageError),
    #[error("no face detected")]
    NoFace,
    #[error("oracle returned no embedding")]
    NoEmbedding,
    #[error(transparent)]
    Oracle(OracleError),
}

/// Embed every sample under `sample_root`, one subdirectory per person.
///
/// Per-file problems (undecodable image, no face, oracle failure on that
/// image) are logged and skipped. Only an oracle that reports itself
/// unavailable aborts the run. A missing root yields an empty map.
pub fn compute_encodings<O>(oracle: &mut O, sample_root: &Path) -> Result<EncodingMap, OracleError>
where
    O: EmbeddingOracle + ?Sized,
{
    let mut encodings = EncodingMap::new();

    let people = match sorted_entries(sample_root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(root = %sample_root.display(), error = %e, "sample root unreadable; nothing to train");
            return Ok(encodings);
        }
    };

    for person_dir in people.into_iter().filter(|p| p.is_dir()) {
        let Some(person) = person_dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            tracing::warn!(dir = %person_dir.display(), "skipping directory with non-UTF-8 name");
            continue;
        };

        let files: Vec<PathBuf> = match sorted_entries(&person_dir) {
            Ok(entries) => entries
                .into_iter()
                .filter(|p| p.is_file() && is_sample_image(p))
                .collect(),
            Err(e) => {
                tracing::error!(person = %person, error = %e, "failed to list samples");
                continue;
            }
        };
        if files.is_empty() {
            tracing::warn!(person = %person, "no sample images found; skipping");
            continue;
        }

        tracing::info!(person = %person, files = files.len(), "processing samples");
        let mut embeddings = Vec::with_capacity(files.len());
        for file in &files {
            match encode_sample(oracle, file) {
                Ok(embedding) => embeddings.push(embedding),
                Err(SkipReason::Oracle(e)) if e.is_fatal() => return Err(e),
                Err(SkipReason::NoFace) => {
                    tracing::debug!(path = %file.display(), "no face in sample; skipped");
                }
                Err(reason) => {
                    tracing::error!(path = %file.display(), %reason, "failed to process sample; skipped");
                }
            }
        }

        if embeddings.is_empty() {
            tracing::warn!(person = %person, files = files.len(), "no usable samples; person omitted");
            continue;
        }
        tracing::info!(person = %person, encoded = embeddings.len(), files = files.len(), "person encoded");
        encodings.insert(person, embeddings);
    }

    Ok(encodings)
}

fn encode_sample<O>(oracle: &mut O, path: &Path) -> Result<Embedding, SkipReason>
where
    O: EmbeddingOracle + ?Sized,
{
    let image = image::open(path).map_err(SkipReason::Decode)?.to_rgb8();
    let faces = oracle.detect(&image).map_err(SkipReason::Oracle)?;
    let face = faces.first().ok_or(SkipReason::NoFace)?;
    if faces.len() > 1 {
        tracing::warn!(path = %path.display(), faces = faces.len(), "multiple faces in sample; using the first");
    }
    oracle
        .embed(&image, face)
        .map_err(SkipReason::Oracle)?
        .ok_or(SkipReason::NoEmbedding)
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// Component-wise arithmetic mean. `None` for an empty slice.
///
/// Accumulates in f64; no normalization is applied to the result.
pub fn mean_embedding(embeddings: &[Embedding]) -> Option<Embedding> {
    let first = embeddings.first()?;
    let mut sums = vec![0.0f64; first.dim()];
    for e in embeddings {
        debug_assert_eq!(e.dim(), sums.len(), "embedding dimensionality must be uniform");
        for (s, v) in sums.iter_mut().zip(&e.values) {
            *s += *v as f64;
        }
    }
    let n = embeddings.len() as f64;
    Some(Embedding::new(sums.into_iter().map(|s| (s / n) as f32).collect()))
}

/// Collapse each person's embeddings to their mean and overwrite `destination`.
///
/// People without any embedding are left out. Returns the store as written.
pub fn save_encodings(encodings: &EncodingMap, destination: &Path) -> Result<EncodingStore, StoreError> {
    let store: EncodingStore = encodings
        .iter()
        .filter_map(|(name, list)| match mean_embedding(list) {
            Some(mean) => Some((name.clone(), mean)),
            None => {
                tracing::warn!(person = %name, "no encodings found; skipping");
                None
            }
        })
        .collect();

    store.save(destination)?;
    tracing::info!(identities = store.len(), "training complete");
    Ok(store)
}

/// Full rebuild: [`compute_encodings`] followed by [`save_encodings`].
pub fn train<O>(oracle: &mut O, sample_root: &Path, destination: &Path) -> Result<EncodingStore, TrainError>
where
    O: EmbeddingOracle + ?Sized,
{
    let encodings = compute_encodings(oracle, sample_root)?;
    Ok(save_encodings(&encodings, destination)?)
}
