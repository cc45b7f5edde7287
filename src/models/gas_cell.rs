//! Absorption gas cell (e.g. iodine) with a wavelength shift and depth scaling.

use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::interp_clamped;
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet, load_resampled_template};
use crate::models::Parameter;

pub const GAS_CELL_KEY: &str = "gas_cell";

#[derive(Debug, Clone, Deserialize)]
pub struct GasCellSettings {
    #[serde(default = "default_name")]
    pub name: String,
    pub input_file: PathBuf,
    /// `[lower, start, upper]` shift in wavelength units.
    #[serde(default = "zero_triple")]
    pub shift: [f64; 3],
    /// `[lower, start, upper]` optical depth scale.
    #[serde(default = "unit_triple")]
    pub depth: [f64; 3],
}

fn default_name() -> String {
    "gas_cell".to_string()
}

fn zero_triple() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}

fn unit_triple() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Debug, Clone)]
pub struct GasCellModel {
    settings: GasCellSettings,
}

impl GasCellModel {
    pub fn new(settings: GasCellSettings) -> Self {
        Self { settings }
    }
}

impl Component for GasCellModel {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        let n = &self.settings.name;
        Ok(vec![
            Parameter::from_triple(format!("{n}_shift"), self.settings.shift),
            Parameter::from_triple(format!("{n}_depth"), self.settings.depth),
        ])
    }

    fn load_templates(&self, wave_hr: &[f64]) -> Result<Vec<(String, Vec<f64>)>, AppError> {
        let flux = load_resampled_template(&self.settings.input_file, wave_hr)?;
        Ok(vec![(GAS_CELL_KEY.to_string(), flux)])
    }
}

impl SpectralFactor for GasCellModel {
    fn build(&self, params: &[Parameter], templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64> {
        let (shift, depth) = (params[0].value, params[1].value);
        let Ok(flux) = templates.get(GAS_CELL_KEY) else {
            return vec![f64::NAN; grid.len()];
        };
        let nodes: Vec<f64> = grid.wave.iter().map(|w| w + shift).collect();
        interp_clamped(&grid.wave, &nodes, flux)
            .into_iter()
            .map(|f| f.max(0.0).powf(depth))
            .collect()
    }
}
