//! Telluric absorption: one shared velocity, one depth per species.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::{doppler_factor, interp_clamped};
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet, load_resampled_template};
use crate::models::Parameter;

#[derive(Debug, Clone, Deserialize)]
pub struct SpeciesSettings {
    pub input_file: PathBuf,
    pub depth: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelluricSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// `[lower, start, upper]` velocity (m/s).
    pub vel: [f64; 3],
    pub species: BTreeMap<String, SpeciesSettings>,
}

fn default_name() -> String {
    "tellurics".to_string()
}

#[derive(Debug, Clone)]
pub struct TelluricModel {
    settings: TelluricSettings,
}

impl TelluricModel {
    pub fn new(settings: TelluricSettings) -> Result<Self, AppError> {
        if settings.species.is_empty() {
            return Err(AppError::config("Telluric blueprint lists no species."));
        }
        Ok(Self { settings })
    }

    fn key(species: &str) -> String {
        format!("tellurics/{species}")
    }
}

impl Component for TelluricModel {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        let n = &self.settings.name;
        let mut out = vec![Parameter::from_triple(format!("{n}_vel"), self.settings.vel)];
        for (species, s) in &self.settings.species {
            out.push(Parameter::from_triple(format!("{n}_{species}_depth"), s.depth));
        }
        Ok(out)
    }

    fn load_templates(&self, wave_hr: &[f64]) -> Result<Vec<(String, Vec<f64>)>, AppError> {
        self.settings
            .species
            .iter()
            .map(|(species, s)| Ok((Self::key(species), load_resampled_template(&s.input_file, wave_hr)?)))
            .collect()
    }
}

impl SpectralFactor for TelluricModel {
    fn build(&self, params: &[Parameter], templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64> {
        let factor = doppler_factor(params[0].value);
        let nodes: Vec<f64> = grid.wave.iter().map(|w| w * factor).collect();
        let mut out = vec![1.0; grid.len()];
        for (k, species) in self.settings.species.keys().enumerate() {
            let depth = params[k + 1].value;
            let Ok(flux) = templates.get(&Self::key(species)) else {
                return vec![f64::NAN; grid.len()];
            };
            let shifted = interp_clamped(&grid.wave, &nodes, flux);
            for (o, f) in out.iter_mut().zip(shifted) {
                *o *= f.max(0.0).powf(depth);
            }
        }
        out
    }
}
