//! Result exports: per-order RV archives, stellar templates and combined RVs.
//!
//! File names are `{target}_{tag}_ord{N}_rvs.json` style so several orders of one
//! run sit side by side in the output directory and `combine` can find them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::io::{read_json, write_json};
use crate::rvs::{CombinedRvs, RvArchive};

fn stem(target: Option<&str>, tag: &str) -> String {
    match target {
        Some(t) if !t.is_empty() => format!("{t}_{tag}"),
        _ => tag.to_string(),
    }
}

pub fn rv_archive_path(dir: &Path, target: Option<&str>, tag: &str, order_num: usize) -> PathBuf {
    dir.join(format!("{}_ord{order_num}_rvs.json", stem(target, tag)))
}

pub fn template_path(dir: &Path, target: Option<&str>, tag: &str, order_num: usize, iteration: usize) -> PathBuf {
    dir.join(format!("{}_ord{order_num}_stellar_template_iter{iteration}.csv", stem(target, tag)))
}

pub fn fit_history_path(dir: &Path, target: Option<&str>, tag: &str, order_num: usize) -> PathBuf {
    dir.join(format!("{}_ord{order_num}_fit_history.json", stem(target, tag)))
}

pub fn write_rv_archive(path: &Path, archive: &RvArchive) -> Result<(), AppError> {
    write_json(path, archive)
}

pub fn read_rv_archive(path: &Path) -> Result<RvArchive, AppError> {
    read_json(path)
}

/// Find the RV archive of `order_num` in `dir` (any target/tag).
pub fn find_rv_archive(dir: &Path, order_num: usize) -> Result<PathBuf, AppError> {
    let suffix = format!("_ord{order_num}_rvs.json");
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::config(format!("Failed to list '{}': {e}", dir.display())))?;
    let mut hits: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().ends_with(&suffix)))
        .collect();
    hits.sort();
    match hits.len() {
        0 => Err(AppError::config(format!(
            "No RV archive for order {order_num} in '{}'.",
            dir.display()
        ))),
        1 => Ok(hits.remove(0)),
        n => Err(AppError::config(format!(
            "{n} RV archives for order {order_num} in '{}'; keep one run per directory.",
            dir.display()
        ))),
    }
}

/// Write a `(wave, flux)` template as CSV.
pub fn write_template_csv(path: &Path, wave: &[f64], flux: &[f64]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create template CSV '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    let io_err = |e: std::io::Error| AppError::config(format!("Failed to write template CSV: {e}"));
    writeln!(out, "wave,flux").map_err(io_err)?;
    for (w, f) in wave.iter().zip(flux) {
        writeln!(out, "{w:.6},{f:.8}").map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

/// Write combined per-spectrum and nightly RVs as two CSV files.
pub fn write_combined_csv(dir: &Path, stem: &str, combined: &CombinedRvs) -> Result<(PathBuf, PathBuf), AppError> {
    let io_err = |e: std::io::Error| AppError::config(format!("Failed to write combined RVs: {e}"));
    let spectra_path = dir.join(format!("{stem}_rvs_combined.csv"));
    let nightly_path = dir.join(format!("{stem}_rvs_combined_nightly.csv"));

    let mut out = BufWriter::new(File::create(&spectra_path).map_err(io_err)?);
    writeln!(out, "bjd,rv,rv_unc").map_err(io_err)?;
    for ((t, v), u) in combined.bjds.iter().zip(&combined.rvs).zip(&combined.unc) {
        writeln!(out, "{t:.6},{v:.4},{u:.4}").map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;

    let mut out = BufWriter::new(File::create(&nightly_path).map_err(io_err)?);
    writeln!(out, "bjd,rv,rv_unc,n_obs").map_err(io_err)?;
    for (((t, v), u), n) in combined
        .bjds_nightly
        .iter()
        .zip(&combined.rvs_nightly)
        .zip(&combined.unc_nightly)
        .zip(&combined.n_obs_nights)
    {
        writeln!(out, "{t:.6},{v:.4},{u:.4},{n}").map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;

    Ok((spectra_path, nightly_path))
}
