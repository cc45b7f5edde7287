//! Doppler-shifted stellar template.

use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::{doppler_factor, interp_clamped};
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet, load_resampled_template};
use crate::models::Parameter;

#[derive(Debug, Clone, Deserialize)]
pub struct StarSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Synthetic starting template. When absent the run bootstraps from a flat
    /// template and the first pass fits without the star.
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    /// `[lower, start, upper]` velocity (m/s).
    pub vel: [f64; 3],
}

fn default_name() -> String {
    "star".to_string()
}

#[derive(Debug, Clone)]
pub struct StarModel {
    settings: StarSettings,
}

impl StarModel {
    pub fn new(settings: StarSettings) -> Self {
        Self { settings }
    }

    pub fn input_file(&self) -> Option<&PathBuf> {
        self.settings.input_file.as_ref()
    }

    /// Load the starting template (flat continuum when no file is configured).
    pub fn initial_template(&self, wave_hr: &[f64]) -> Result<Vec<f64>, AppError> {
        match &self.settings.input_file {
            Some(path) => load_resampled_template(path, wave_hr),
            None => Ok(vec![1.0; wave_hr.len()]),
        }
    }

    /// Shift an arbitrary flux array defined on the grid by `vel`.
    pub fn shift(flux: &[f64], wave_hr: &[f64], vel: f64) -> Vec<f64> {
        let factor = doppler_factor(vel);
        let shifted: Vec<f64> = wave_hr.iter().map(|w| w * factor).collect();
        interp_clamped(wave_hr, &shifted, flux)
    }
}

impl Component for StarModel {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        Ok(vec![Parameter::from_triple(format!("{}_vel", self.settings.name), self.settings.vel)])
    }
}

impl SpectralFactor for StarModel {
    fn build(&self, params: &[Parameter], templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64> {
        Self::shift(&templates.star, &grid.wave, params[0].value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::SPEED_OF_LIGHT;

    #[test]
    fn shift_moves_a_line_redward() {
        let wave: Vec<f64> = (0..2001).map(|i| 5000.0 + i as f64 * 0.005).collect();
        let flux: Vec<f64> = wave.iter().map(|w| 1.0 - 0.5 * (-(w - 5005.0f64).powi(2) / 0.001).exp()).collect();
        let vel = 3000.0;
        let shifted = StarModel::shift(&flux, &wave, vel);
        let min_idx = shifted
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        let expected = 5005.0 * (vel / SPEED_OF_LIGHT).exp();
        assert!((wave[min_idx] - expected).abs() <= 0.005);
    }
}
