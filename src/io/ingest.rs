//! CSV ingest for spectra, templates and barycentric corrections.
//!
//! Every reader follows the same pattern:
//!
//! - headers are matched case-insensitively (BOM stripped, a few aliases accepted)
//! - missing required columns are configuration errors (exit code 2)
//! - unparseable cells are collected as row errors rather than aborting the file
//!
//! Spectra keep one row per pixel even when a cell is bad (the value becomes NaN
//! and the sanity pass masks it), because pixel indices must line up across the
//! flux, uncertainty and mask arrays.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::domain::{BaryCorrection, Observation, OrderInput, Template};
use crate::error::AppError;

/// A cell-level problem encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Raw per-pixel arrays of one spectrum file.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumTable {
    pub wave: Option<Vec<f64>>,
    pub flux: Vec<f64>,
    pub flux_unc: Vec<f64>,
    pub mask: Vec<f64>,
    pub row_errors: Vec<RowError>,
}

const WAVE: &[&str] = &["wave", "wavelength", "lambda"];
const FLUX: &[&str] = &["flux"];
const FLUX_UNC: &[&str] = &["flux_unc", "unc", "err", "sigma"];
const MASK: &[&str] = &["mask"];
const BJD: &[&str] = &["bjd", "time_jd", "jd"];
const BC_VEL: &[&str] = &["bc_vel", "bc", "bc_velocity"];

fn open_reader(path: &Path, what: &str) -> Result<(csv::Reader<File>, HashMap<String, usize>), AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open {what} '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("Failed to read {what} headers '{}': {e}", path.display())))?
        .clone();
    Ok((reader, build_header_map(&headers)))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn find_column(header_map: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|a| header_map.get(*a).copied())
}

fn require_column(
    header_map: &HashMap<String, usize>,
    aliases: &[&str],
    path: &Path,
) -> Result<usize, AppError> {
    find_column(header_map, aliases).ok_or_else(|| {
        AppError::config(format!(
            "'{}' is missing required column `{}`.",
            path.display(),
            aliases[0]
        ))
    })
}

fn parse_cell(record: &StringRecord, idx: usize) -> Result<f64, String> {
    let raw = record.get(idx).unwrap_or("");
    match raw.to_ascii_lowercase().as_str() {
        "nan" => Ok(f64::NAN),
        s => s.parse::<f64>().map_err(|_| format!("invalid number '{raw}' in column {}", idx + 1)),
    }
}

/// Read one spectrum CSV (`flux` and `flux_unc` required; `wave`, `mask` optional).
pub fn read_spectrum_csv(path: &Path) -> Result<SpectrumTable, AppError> {
    let (mut reader, header_map) = open_reader(path, "spectrum")?;
    let flux_col = require_column(&header_map, FLUX, path)?;
    let unc_col = require_column(&header_map, FLUX_UNC, path)?;
    let wave_col = find_column(&header_map, WAVE);
    let mask_col = find_column(&header_map, MASK);

    let mut table = SpectrumTable {
        wave: wave_col.map(|_| Vec::new()),
        flux: Vec::new(),
        flux_unc: Vec::new(),
        mask: Vec::new(),
        row_errors: Vec::new(),
    };

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                table.row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                StringRecord::new()
            }
        };
        let mut cell = |col: usize| {
            parse_cell(&record, col).unwrap_or_else(|message| {
                table.row_errors.push(RowError { line, message });
                f64::NAN
            })
        };
        let flux = cell(flux_col);
        let unc = cell(unc_col);
        let wave = wave_col.map(&mut cell);
        let mask = mask_col.map_or(1.0, |c| if cell(c) > 0.5 { 1.0 } else { 0.0 });
        table.flux.push(flux);
        table.flux_unc.push(unc);
        table.mask.push(mask);
        if let (Some(w), Some(v)) = (table.wave.as_mut(), wave) {
            w.push(v);
        }
    }

    if table.flux.is_empty() {
        return Err(AppError::data(format!("Spectrum '{}' has no rows.", path.display())));
    }
    Ok(table)
}

/// Read a `(wave, flux)` template CSV. Rows with non-finite values are skipped.
pub fn read_template_csv(path: &Path) -> Result<Template, AppError> {
    let (mut reader, header_map) = open_reader(path, "template")?;
    let wave_col = require_column(&header_map, WAVE, path)?;
    let flux_col = require_column(&header_map, FLUX, path)?;

    let mut wave = Vec::new();
    let mut flux = Vec::new();
    let mut skipped = 0usize;
    for result in reader.records() {
        let record = result?;
        match (parse_cell(&record, wave_col), parse_cell(&record, flux_col)) {
            (Ok(w), Ok(f)) if w.is_finite() && f.is_finite() => {
                wave.push(w);
                flux.push(f);
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("Template '{}': skipped {skipped} unusable rows.", path.display());
    }
    Template::new(wave, flux).map_err(|e| e.context(path.display()))
}

/// Read `bjd,bc_vel` rows.
pub fn read_bary_csv(path: &Path) -> Result<Vec<BaryCorrection>, AppError> {
    let (mut reader, header_map) = open_reader(path, "barycentric file")?;
    let bjd_col = require_column(&header_map, BJD, path)?;
    let vel_col = require_column(&header_map, BC_VEL, path)?;

    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        let parse = |col| {
            parse_cell(&record, col)
                .map_err(|msg| AppError::config(format!("'{}' line {}: {msg}", path.display(), idx + 2)))
        };
        out.push(BaryCorrection {
            bjd: parse(bjd_col)?,
            bc_vel: parse(vel_col)?,
        });
    }
    Ok(out)
}

/// Supplier of barycentric corrections, one per observation in input order.
pub trait BarycentricSource {
    fn corrections(&self, n_obs: usize) -> Result<Vec<BaryCorrection>, AppError>;
}

/// Corrections cached in a CSV file.
#[derive(Debug, Clone)]
pub struct BaryFile(pub PathBuf);

impl BarycentricSource for BaryFile {
    fn corrections(&self, n_obs: usize) -> Result<Vec<BaryCorrection>, AppError> {
        let rows = read_bary_csv(&self.0)?;
        if rows.len() != n_obs {
            return Err(AppError::config(format!(
                "'{}' has {} rows for {n_obs} spectra.",
                self.0.display(),
                rows.len()
            )));
        }
        Ok(rows)
    }
}

/// Corrections already held in memory.
impl BarycentricSource for Vec<BaryCorrection> {
    fn corrections(&self, n_obs: usize) -> Result<Vec<BaryCorrection>, AppError> {
        if self.len() != n_obs {
            return Err(AppError::config(format!(
                "{} barycentric corrections supplied for {n_obs} spectra.",
                self.len()
            )));
        }
        Ok(self.clone())
    }
}

/// Load every spectrum of one order.
///
/// Unreadable spectra are dropped with a warning; the survivors keep their
/// relative order. Returns an empty vector (not an error) when every file fails;
/// the caller decides whether that is fatal.
pub fn load_observations(order: &OrderInput, bary: &dyn BarycentricSource) -> Result<Vec<Observation>, AppError> {
    let corrections = bary.corrections(order.spectra.len())?;
    let mut out = Vec::with_capacity(order.spectra.len());
    for (path, bc) in order.spectra.iter().zip(corrections) {
        let table = match read_spectrum_csv(path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Order {}: dropping spectrum: {e}", order.order_num);
                continue;
            }
        };
        if !table.row_errors.is_empty() {
            log::debug!(
                "'{}': {} bad cells (first at line {}).",
                path.display(),
                table.row_errors.len(),
                table.row_errors[0].line
            );
        }
        let obs = Observation {
            id: path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            wave: table.wave,
            flux: table.flux,
            flux_unc: table.flux_unc,
            mask: table.mask,
            time_jd: bc.bjd,
            bc_vel: bc.bc_vel,
        };
        match obs.validate() {
            Ok(()) => out.push(obs),
            Err(e) => log::warn!("Order {}: dropping spectrum: {e}", order.order_num),
        }
    }
    Ok(out)
}
