use anyhow::{Context, Result};
use roster_core::{AugmentConfig, EnrollmentSettings, OnnxOracle};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then `ROSTER_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-person sample directories.
    pub sample_dir: PathBuf,
    /// Path to the JSON encoding store.
    pub store_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Augmented samples collected per person before training.
    pub quota: usize,
    /// Euclidean distance below which a face is considered a match. Defaults
    /// to the ONNX oracle's calibrated value.
    pub tolerance: f32,
    pub rotation_degrees: f32,
    pub blur_probability: f64,
}

/// On-disk form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    sample_dir: Option<PathBuf>,
    store_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    quota: Option<usize>,
    tolerance: Option<f32>,
    rotation_degrees: Option<f32>,
    blur_probability: Option<f64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("ROSTER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let config_path = std::env::var("ROSTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("config.toml"));
        let file = FileConfig::load(&config_path)?;

        let defaults = AugmentConfig::default();
        Ok(Self {
            sample_dir: env_path("ROSTER_SAMPLE_DIR")
                .or(file.sample_dir)
                .unwrap_or_else(|| data_dir.join("dataset")),
            store_path: env_path("ROSTER_STORE_PATH")
                .or(file.store_path)
                .unwrap_or_else(|| data_dir.join("encodings.json")),
            model_dir: env_path("ROSTER_MODEL_DIR")
                .or(file.model_dir)
                .unwrap_or_else(roster_core::default_model_dir),
            quota: env_parse("ROSTER_QUOTA")
                .or(file.quota)
                .unwrap_or(roster_core::DEFAULT_QUOTA),
            tolerance: env_parse("ROSTER_TOLERANCE")
                .or(file.tolerance)
                .unwrap_or(OnnxOracle::DEFAULT_TOLERANCE),
            rotation_degrees: env_parse("ROSTER_ROTATION_DEGREES")
                .or(file.rotation_degrees)
                .unwrap_or(defaults.rotation_degrees),
            blur_probability: env_parse("ROSTER_BLUR_PROBABILITY")
                .or(file.blur_probability)
                .unwrap_or(defaults.blur_probability),
        })
    }

    pub fn enrollment_settings(&self) -> EnrollmentSettings {
        EnrollmentSettings {
            quota: self.quota,
            augment: AugmentConfig {
                rotation_degrees: self.rotation_degrees,
                blur_probability: self.blur_probability,
            },
            ..EnrollmentSettings::new(self.sample_dir.clone(), self.store_path.clone())
        }
    }
}

impl FileConfig {
    /// A missing file is not an error; a malformed one is.
    fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let file: FileConfig =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(file)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("roster")
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
