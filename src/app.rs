//! Top-level application orchestration.
//!
//! `src/main.rs` only maps errors to exit codes; this module is the real main:
//!
//! - parses CLI arguments and initialises logging
//! - `run`: fits every order of a run file, exports archives and templates,
//!   prints the per-order reports and optionally writes debug bundles
//! - `combine`: merges per-order RV archives into one time series
//! - `synth`: writes a synthetic dataset with a ready-to-run config

use std::path::Path;

use clap::Parser;

use crate::cli::{Cli, CombineArgs, Command, RunArgs, SynthArgs};
use crate::data::{SynthSettings, generate, write_dataset};
use crate::domain::FitSettings;
use crate::error::AppError;
use crate::io::{find_rv_archive, read_json, read_rv_archive, write_combined_csv, write_json};
use crate::report::{OrderReport, format_combined, format_order_summary};
use crate::rvs::{CombineOptions, combine_orders};

pub mod pipeline;

/// Entry point for the `rvfm` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Combine(args) => handle_combine(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    // A second init (tests, embedding) keeps the first logger.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init();
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let run = pipeline::load_run(&args.config)?;
    let settings = settings_from_args(&run.config.settings, &args)?;

    let orders: Vec<_> = if args.orders.is_empty() {
        run.config.orders.iter().collect()
    } else {
        args.orders
            .iter()
            .map(|n| {
                run.config
                    .orders
                    .iter()
                    .find(|o| o.order_num == *n)
                    .ok_or_else(|| AppError::config(format!("Order {n} is not in '{}'.", args.config.display())))
            })
            .collect::<Result<Vec<_>, AppError>>()?
    };

    log::info!(
        "Run '{}': {} order(s), {} template fit(s), {} augmenter, output '{}'.",
        run.tag,
        orders.len(),
        settings.n_template_fits,
        settings.augmenter.kind.display_name(),
        settings.output_dir.display()
    );

    for order in orders {
        let out = pipeline::run_order(&run, order, &settings)?;
        println!("{}", format_order_summary(&OrderReport::from_collection(&out.collection, args.top)));
        for path in &out.written {
            log::debug!("Wrote '{}'.", path.display());
        }
        if args.debug {
            let path = crate::debug::write_debug_bundle(&out.collection, &settings.output_dir.join("debug"))?;
            log::info!("Debug bundle: '{}'.", path.display());
        }
    }
    Ok(())
}

/// Run-file settings with command-line overrides on top.
pub fn settings_from_args(base: &FitSettings, args: &RunArgs) -> Result<FitSettings, AppError> {
    let mut s = base.clone();
    if let Some(w) = args.workers {
        s.n_workers = w;
    }
    if let Some(dir) = &args.output {
        s.output_dir = dir.clone();
    }
    if let Some(n) = args.n_template_fits {
        s.n_template_fits = n;
    }
    if let Some(kind) = args.augmenter {
        s.augmenter.kind = kind;
    }
    s.validate()?;
    Ok(s)
}

fn handle_combine(args: CombineArgs) -> Result<(), AppError> {
    let archives = args
        .orders
        .iter()
        .map(|n| read_rv_archive(&find_rv_archive(&args.input, *n)?))
        .collect::<Result<Vec<_>, _>>()?;

    let opts = CombineOptions {
        iteration: args.iteration,
        bad_nights: args.bad_nights.clone(),
        bad_spectra: args.bad_spectra.clone(),
        nightly_outlier_sigma: args.outlier_sigma,
        use_rv_content: args.use_rv_content,
    };
    let combined = combine_orders(&archives, &opts)?;

    let out_dir = args.output.as_deref().unwrap_or(&args.input);
    create_dir(out_dir)?;
    let (spectra, nightly) = write_combined_csv(out_dir, &args.stem, &combined)?;
    write_json(&out_dir.join(format!("{}_rvs_combined.json", args.stem)), &combined)?;
    log::info!("Wrote '{}' and '{}'.", spectra.display(), nightly.display());

    println!("{}", format_combined(&combined));
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let mut settings: SynthSettings = match &args.settings {
        Some(path) => read_json(path)?,
        None => SynthSettings::default(),
    };
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(n) = args.n_nights {
        settings.n_nights = n;
    }
    if let Some(n) = args.spectra_per_night {
        settings.spectra_per_night = n;
    }
    if let Some(snr) = args.snr {
        settings.snr = snr;
    }

    let dataset = generate(&settings)?;
    let run_path = write_dataset(&args.output, &dataset, &settings)?;
    println!("Run it with: rvfm run --config {}", run_path.display());
    Ok(())
}

fn create_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir).map_err(|e| AppError::config(format!("Failed to create '{}': {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AugmenterKind;

    #[test]
    fn cli_overrides_replace_run_file_settings() {
        let cli = Cli::parse_from(["rvfm", "run", "-c", "r.json", "-n", "3", "--augmenter", "global-fit", "-o", "out"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let s = settings_from_args(&FitSettings::default(), &args).unwrap();
        assert_eq!(s.n_template_fits, 3);
        assert_eq!(s.augmenter.kind, AugmenterKind::GlobalFit);
        assert_eq!(s.output_dir, Path::new("out"));
        assert_eq!(s.n_workers, FitSettings::default().n_workers);

        let cli = Cli::parse_from(["rvfm", "run", "-c", "r.json", "-n", "0"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(settings_from_args(&FitSettings::default(), &args).unwrap_err().exit_code(), 2);
    }
}
