//! Component capability traits and the shared data they build against.
//!
//! Every sub-model of the forward model is a `Component`: it knows its name, the
//! parameters it contributes for a given spectrum, and optionally which static
//! templates it needs loaded onto the high-resolution grid. Components that
//! contribute a factor (or additive term) on the high-resolution grid also
//! implement `SpectralFactor`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::domain::{Blueprint, Observation};
use crate::error::AppError;
use crate::math::interp_fill;
use crate::models::Parameter;

/// The fixed high-resolution wavelength grid every component is evaluated on.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelGrid {
    pub wave: Vec<f64>,
    /// Model wavelength bounds before padding.
    pub wave_min: f64,
    pub wave_max: f64,
    /// Grid spacing.
    pub dl: f64,
}

impl ModelGrid {
    pub fn new(wave_min: f64, wave_max: f64, pad: f64, n_model_pix: usize) -> Result<Self, AppError> {
        if !(wave_min.is_finite() && wave_max.is_finite() && wave_max > wave_min) {
            return Err(AppError::config(format!(
                "Invalid model wavelength bounds [{wave_min}, {wave_max}]."
            )));
        }
        if n_model_pix < 2 {
            return Err(AppError::config("The high-resolution grid needs at least two pixels."));
        }
        let wave = crate::math::linspace(wave_min - pad, wave_max + pad, n_model_pix);
        let dl = wave[1] - wave[0];
        Ok(Self {
            wave,
            wave_min,
            wave_max,
            dl,
        })
    }

    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }
}

/// Templates resampled onto the high-resolution grid.
///
/// The stellar template is the only one that changes between iterations; the
/// collection owns this value and swaps `star` wholesale after augmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSet {
    pub star: Vec<f64>,
    /// Static templates keyed by component (e.g. `"gas_cell"`, `"tellurics/water"`).
    pub fixed: BTreeMap<String, Vec<f64>>,
}

impl TemplateSet {
    pub fn get(&self, key: &str) -> Result<&[f64], AppError> {
        self.fixed
            .get(key)
            .map(|v| v.as_slice())
            .ok_or_else(|| AppError::config(format!("Template '{key}' was never loaded.")))
    }
}

/// Common capability set of all forward-model components.
pub trait Component: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Parameters this component contributes for `obs`.
    ///
    /// The count and order must not depend on `obs`; only starting values may.
    fn init_parameters(&self, obs: &Observation) -> Result<Vec<Parameter>, AppError>;

    /// Static templates to resample onto the high-resolution grid, keyed for lookup in
    /// [`TemplateSet::fixed`].
    fn load_templates(&self, _wave_hr: &[f64]) -> Result<Vec<(String, Vec<f64>)>, AppError> {
        Ok(Vec::new())
    }
}

/// A component evaluated on the high-resolution grid.
pub trait SpectralFactor: Component {
    fn build(&self, params: &[Parameter], templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64>;
}

/// Decode a blueprint's settings into a typed settings struct.
pub fn decode_settings<T: DeserializeOwned>(role: &str, blueprint: &Blueprint) -> Result<T, AppError> {
    serde_json::from_value(serde_json::Value::Object(blueprint.settings.clone())).map_err(|e| {
        AppError::config(format!(
            "Blueprint '{role}' (class '{}') is invalid: {e}",
            blueprint.class
        ))
    })
}

/// Resolve a template path relative to the run file directory.
pub fn resolve_path(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base_dir.join(file)
    }
}

/// Read a `(wave, flux)` CSV template and resample it onto the high-resolution grid.
///
/// Grid points outside the template's support are filled with continuum (1.0).
pub fn load_resampled_template(path: &Path, wave_hr: &[f64]) -> Result<Vec<f64>, AppError> {
    let template = crate::io::read_template_csv(path)?;
    let (lo, hi) = template.wave_range();
    let uncovered = wave_hr.iter().filter(|w| **w < lo || **w > hi).count();
    if uncovered > 0 {
        log::warn!(
            "Template '{}' does not cover {uncovered} of {} grid points; filling with continuum.",
            path.display(),
            wave_hr.len()
        );
    }
    Ok(interp_fill(wave_hr, &template.wave, &template.flux, 1.0))
}
