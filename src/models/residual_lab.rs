//! Fixed additive laboratory background (e.g. residual lamp contamination).

use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::interp_fill;
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet};
use crate::models::Parameter;

pub const RESIDUAL_LAB_KEY: &str = "residual_lab";

#[derive(Debug, Clone, Deserialize)]
pub struct ResidualLabSettings {
    #[serde(default = "default_name")]
    pub name: String,
    pub input_file: PathBuf,
}

fn default_name() -> String {
    "residual_lab".to_string()
}

#[derive(Debug, Clone)]
pub struct ResidualLab {
    settings: ResidualLabSettings,
}

impl ResidualLab {
    pub fn new(settings: ResidualLabSettings) -> Self {
        Self { settings }
    }
}

impl Component for ResidualLab {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        Ok(Vec::new())
    }

    fn load_templates(&self, wave_hr: &[f64]) -> Result<Vec<(String, Vec<f64>)>, AppError> {
        // Additive: zero outside the file's support.
        let template = crate::io::read_template_csv(&self.settings.input_file)?;
        let flux = interp_fill(wave_hr, &template.wave, &template.flux, 0.0);
        Ok(vec![(RESIDUAL_LAB_KEY.to_string(), flux)])
    }
}

impl SpectralFactor for ResidualLab {
    fn build(&self, _params: &[Parameter], templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64> {
        match templates.get(RESIDUAL_LAB_KEY) {
            Ok(v) => v.to_vec(),
            Err(_) => vec![0.0; grid.len()],
        }
    }
}
