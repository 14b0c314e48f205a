//! Durable encoding store: person name → representative embedding, as JSON.

use crate::types::Embedding;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// No store file exists yet, as opposed to a store that is present but empty.
    #[error("encoding store not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read encoding store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed encoding store {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write encoding store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// In-memory view of the store. Iteration is in name order, which is also the
/// tie-break order used when matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingStore {
    records: BTreeMap<String, Embedding>,
}

impl EncodingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.to_path_buf())
            } else {
                StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let records: BTreeMap<String, Embedding> =
            serde_json::from_str(&text).map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), identities = records.len(), "encoding store loaded");
        Ok(Self { records })
    }

    /// Replace the file at `path` with this store.
    ///
    /// Writes a uniquely named sibling temp file and renames it into place so
    /// readers see either the old store or the new one, never a partial write.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(write_err)?;
                parent
            }
            None => Path::new("."),
        };

        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        // Unique per call, so concurrent saves to the same path never share a temp file.
        let mut temp = NamedTempFile::new_in(parent).map_err(write_err)?;
        temp.write_all(&json).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(path).map_err(|e| write_err(e.error))?;

        tracing::info!(path = %path.display(), identities = self.records.len(), "encoding store written");
        Ok(())
    }

    pub fn insert(&mut self, name: impl Into<String>, embedding: Embedding) -> Option<Embedding> {
        self.records.insert(name.into(), embedding)
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.records.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(String, Embedding)> for EncodingStore {
    fn from_iter<I: IntoIterator<Item = (String, Embedding)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
