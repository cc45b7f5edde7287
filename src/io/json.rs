//! JSON read/write helpers.
//!
//! `serde_json` writes non-finite floats as `null`. Archives carry NaN for
//! undefined entries (failed fits, empty nights, iterations without
//! cross-correlation), so the matching deserializers map `null` back to NaN.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Pretty-print `value` to `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| AppError::config(format!("Failed to write JSON '{}': {e}", path.display())))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::config(format!("Invalid JSON '{}': {e}", path.display())))
}

fn or_nan(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

/// `[f64 | null]` → `Vec<f64>` with `null` as NaN.
pub fn nullable_vec<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(or_nan).collect())
}

/// `[[f64 | null]]` → `Vec<Vec<f64>>` with `null` as NaN.
pub fn nullable_matrix<'de, D>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Vec<Option<f64>>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|row| row.into_iter().map(or_nan).collect())
        .collect())
}

/// `[[[f64 | null]]]` → `Vec<Vec<Vec<f64>>>` with `null` as NaN.
pub fn nullable_cube<'de, D>(deserializer: D) -> Result<Vec<Vec<Vec<f64>>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Vec<Vec<Option<f64>>>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|m| m.into_iter().map(|row| row.into_iter().map(or_nan).collect()).collect())
        .collect())
}
