//! Survey image simulator
//!
//! Simulates detector images and truth tables for the dithers and detectors
//! selected by a JSON run configuration.
//!
//! Usage:
//! ```text
//! RUST_LOG=info cargo run --release --bin imsim -- --config run.json --dither 5 --detector 3
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use imsim::sims::{run_survey, Survey};
use imsim::{DetectorId, Filter, SimConfig};
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulate survey detector images and truth tables")]
struct Args {
    /// JSON run configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured filter
    #[arg(long)]
    filter: Option<Filter>,

    /// Simulate only this dither index
    #[arg(long)]
    dither: Option<usize>,

    /// Simulate only this detector (1-18)
    #[arg(long)]
    detector: Option<u8>,

    /// Override the worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Skip units whose truth table already exists
    #[arg(long, default_value_t = false)]
    resume: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = SimConfig::load(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if let Some(filter) = args.filter {
        config.filter = Some(filter);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let detectors = match args.detector {
        Some(id) => vec![DetectorId::new(id)?],
        None => config.detector_list()?,
    };

    let survey = Survey::load(config).context("loading survey inputs")?;
    let dithers = match args.dither {
        Some(dither) => vec![dither],
        None => survey.dithers(),
    };
    info!(
        "Simulating {} dithers on {} detectors with {} workers",
        dithers.len(),
        detectors.len(),
        survey.config.workers
    );

    let summary = run_survey(&survey, &dithers, &detectors, args.resume)?;
    info!("{summary:?}");
    Ok(())
}
