use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roster_core::{
    compute_encodings, recognize_frame, save_encodings, EmbeddingOracle, EncodingStore,
    EnrollmentService, EuclideanMatcher, OnnxOracle, StoreError, TrainingStatus,
};
use std::path::{Path, PathBuf};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "roster", about = "Face enrollment and recognition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from captured frames, training once the quota is reached
    Enroll {
        /// Person name (used as the sample directory name)
        #[arg(short, long)]
        name: String,
        /// Override the configured sample quota
        #[arg(short, long)]
        quota: Option<usize>,
        /// Image files, fed as successive frames
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
    /// Rebuild the encoding store from the sample directory
    Train,
    /// Identify every face in the given images
    Recognize {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Override the configured match tolerance
        #[arg(short, long)]
        tolerance: Option<f32>,
    },
    /// List identities in the encoding store
    List,
    /// Show configuration and store status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Enroll {
            name,
            quota,
            frames,
        } => {
            if let Some(q) = quota {
                config.quota = q;
            }
            enroll(&config, &name, &frames)
        }
        Commands::Train => train(&config),
        Commands::Recognize { images, tolerance } => {
            if let Some(t) = tolerance {
                config.tolerance = t;
            }
            recognize(&config, &images)
        }
        Commands::List => list(&config),
        Commands::Status => status(&config),
    }
}

fn load_oracle(config: &Config) -> Result<OnnxOracle> {
    OnnxOracle::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))
}

fn load_frame(path: &Path) -> Result<image::RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8())
}

fn enroll(config: &Config, name: &str, frames: &[PathBuf]) -> Result<()> {
    let service = EnrollmentService::new(load_oracle(config)?, config.enrollment_settings());
    println!("Enrolling {name} (quota {})", service.quota());

    for path in frames {
        let frame = load_frame(path)?;
        let report = service
            .enroll(name, &frame)
            .with_context(|| format!("enrolling frame {}", path.display()))?;
        println!(
            "{}: {}/{}: {}",
            path.display(),
            report.samples_collected,
            report.quota,
            report.message
        );

        match report.training {
            Some(TrainingStatus::Success { identities }) => {
                println!("Encoding store updated: {identities} identities");
                return Ok(());
            }
            Some(TrainingStatus::Failed { error }) => bail!("training failed: {error}"),
            None => {}
        }
    }

    let collected = service.tracker().collected(name);
    println!(
        "Out of frames with {collected}/{} samples; enrollment incomplete",
        service.quota()
    );
    Ok(())
}

fn train(config: &Config) -> Result<()> {
    let mut oracle = load_oracle(config)?;
    let store = rebuild_store(&mut oracle, &config.sample_dir, &config.store_path)?;
    println!(
        "Encodings saved to {} ({} identities)",
        config.store_path.display(),
        store.len()
    );
    Ok(())
}

/// Recompute the store from `sample_dir`. An empty result leaves the existing
/// store untouched, so a misconfigured sample directory cannot wipe it.
fn rebuild_store<O: EmbeddingOracle>(
    oracle: &mut O,
    sample_dir: &Path,
    store_path: &Path,
) -> Result<EncodingStore> {
    let encodings = compute_encodings(oracle, sample_dir).context("training failed")?;
    if encodings.is_empty() {
        bail!(
            "no encodings generated from {}; {} left unchanged",
            sample_dir.display(),
            store_path.display()
        );
    }
    Ok(save_encodings(&encodings, store_path)?)
}

/// The store must exist before recognition starts; an empty one is allowed.
fn load_store(config: &Config) -> Result<EncodingStore> {
    match EncodingStore::load(&config.store_path) {
        Err(StoreError::NotFound(path)) => {
            bail!("{} not found; run `roster train` first", path.display())
        }
        other => Ok(other?),
    }
}

fn recognize(config: &Config, images: &[PathBuf]) -> Result<()> {
    let store = load_store(config)?;
    if store.is_empty() {
        tracing::warn!("encoding store is empty; every face will be Unknown");
    }
    let mut oracle = load_oracle(config)?;
    let matcher = EuclideanMatcher::new(config.tolerance);

    for path in images {
        let frame = load_frame(path)?;
        let matches = recognize_frame(&mut oracle, &matcher, &store, &frame)
            .with_context(|| format!("recognizing {}", path.display()))?;
        if matches.is_empty() {
            println!("{}: no faces", path.display());
        }
        for m in matches {
            let b = m.bbox;
            println!(
                "{}: [{}, {}, {}, {}] {} ({:.1}%)",
                path.display(),
                b.top,
                b.right,
                b.bottom,
                b.left,
                m.identification.name,
                m.identification.confidence
            );
        }
    }
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = load_store(config)?;
    if store.is_empty() {
        println!("No identities enrolled");
    }
    for (name, embedding) in store.iter() {
        println!("{name} ({}-d)", embedding.dim());
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let (store_state, identities) = match EncodingStore::load(&config.store_path) {
        Ok(store) => ("loaded", store.len()),
        Err(StoreError::NotFound(_)) => ("missing", 0),
        Err(e) => {
            tracing::warn!(error = %e, "encoding store unreadable");
            ("unreadable", 0)
        }
    };

    println!(
        "{}",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sample_dir": config.sample_dir,
            "store_path": config.store_path,
            "store": store_state,
            "identities": identities,
            "model_dir": config.model_dir,
            "models_present": config.model_dir.join(OnnxOracle::DETECTOR_MODEL).exists()
                && config.model_dir.join(OnnxOracle::RECOGNIZER_MODEL).exists(),
            "quota": config.quota,
            "tolerance": config.tolerance,
        })
    );
    Ok(())
}
