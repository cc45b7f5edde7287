//! Fabry–Pérot fringing from a thin optical cavity.

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet};
use crate::models::Parameter;

#[derive(Debug, Clone, Deserialize)]
pub struct FringingSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// `[lower, start, upper]` cavity thickness (wavelength units).
    pub d: [f64; 3],
    /// `[lower, start, upper]` coefficient of finesse.
    pub fin: [f64; 3],
}

fn default_name() -> String {
    "fringing".to_string()
}

#[derive(Debug, Clone)]
pub struct FringingModel {
    settings: FringingSettings,
}

impl FringingModel {
    pub fn new(settings: FringingSettings) -> Self {
        Self { settings }
    }
}

impl Component for FringingModel {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        let n = &self.settings.name;
        Ok(vec![
            Parameter::from_triple(format!("{n}_d"), self.settings.d),
            Parameter::from_triple(format!("{n}_fin"), self.settings.fin),
        ])
    }
}

impl SpectralFactor for FringingModel {
    fn build(&self, params: &[Parameter], _templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64> {
        let (d, fin) = (params[0].value, params[1].value);
        grid.wave
            .iter()
            .map(|w| {
                let s = (2.0 * std::f64::consts::PI * d / w).sin();
                1.0 / (1.0 + fin * s * s)
            })
            .collect()
    }
}
