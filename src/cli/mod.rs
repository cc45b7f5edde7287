//! Command-line parsing for the `rvfm` forward-modeling pipeline.
//!
//! Parsing and dispatch stay here; `app` turns the parsed arguments into runs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::AugmenterKind;
use crate::rvs::IterationChoice;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rvfm", version, about = "Radial-velocity forward modeling with iterative template refinement")]
pub struct Cli {
    /// Log at debug level (RUST_LOG still wins when set).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every order of a run file and write RV archives and templates.
    Run(RunArgs),
    /// Combine per-order RV archives into one RV time series.
    Combine(CombineArgs),
    /// Write a synthetic dataset with a ready-to-run config.
    Synth(SynthArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Run configuration JSON.
    #[arg(short, long, value_name = "JSON")]
    pub config: PathBuf,

    /// Worker threads per order (defaults to the config value).
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Output directory (defaults to the config value).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of RV-producing template fits.
    #[arg(short = 'n', long)]
    pub n_template_fits: Option<usize>,

    /// Template augmentation strategy.
    #[arg(long, value_enum)]
    pub augmenter: Option<AugmenterKind>,

    /// Only fit these orders.
    #[arg(long, value_delimiter = ',')]
    pub orders: Vec<usize>,

    /// Write a markdown debug bundle per order.
    #[arg(long)]
    pub debug: bool,

    /// Rows in the worst-fit table.
    #[arg(long, default_value_t = 5)]
    pub top: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct CombineArgs {
    /// Directory holding `*_ord<N>_rvs.json` archives.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Orders to combine.
    #[arg(long, value_delimiter = ',', required = true)]
    pub orders: Vec<usize>,

    /// Column per order: `last`, `best`, or an explicit index.
    #[arg(long, default_value = "last")]
    pub iteration: IterationChoice,

    /// 1-based night numbers to exclude.
    #[arg(long, value_delimiter = ',')]
    pub bad_nights: Vec<usize>,

    /// 1-based spectrum numbers to exclude.
    #[arg(long, value_delimiter = ',')]
    pub bad_spectra: Vec<usize>,

    /// Weight orders by their template RV content.
    #[arg(long)]
    pub use_rv_content: bool,

    /// Sigma clip for per-night outliers.
    #[arg(long)]
    pub outlier_sigma: Option<f64>,

    /// Output directory (defaults to the input directory).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output file stem.
    #[arg(long, default_value = "combined")]
    pub stem: String,
}

#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Directory to write spectra, corrections and run files into.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Generator settings JSON; defaults are used for missing keys.
    #[arg(long, value_name = "JSON")]
    pub settings: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub n_nights: Option<usize>,

    #[arg(long)]
    pub spectra_per_night: Option<usize>,

    /// Continuum S/N; zero disables noise.
    #[arg(long)]
    pub snr: Option<f64>,
}
