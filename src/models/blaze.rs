//! Instrumental blaze: polynomial about the order centre or an additive spline.

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::{CubicHermite, linspace};
use crate::models::components::{Component, ModelGrid, SpectralFactor, TemplateSet};
use crate::models::Parameter;

#[derive(Debug, Clone, Deserialize)]
pub struct PolynomialBlazeSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// One `[lower, start, upper]` triple per coefficient, constant term first.
    ///
    /// The abscissa is `(λ − λ_mid) / (λ_max − λ_mid)`, so coefficients are of
    /// order unity regardless of the order's wavelength.
    pub coeffs: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplineBlazeSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of spline segments; there are `n_splines + 1` knots.
    pub n_splines: usize,
    /// `[lower, start, upper]` for every knot value.
    pub spline: [f64; 3],
}

fn default_name() -> String {
    "blaze".to_string()
}

/// Blaze variants.
#[derive(Debug, Clone)]
pub enum Blaze {
    Polynomial(PolynomialBlazeSettings),
    /// `1 + S(λ)` where `S` is a natural cubic spline through equally spaced knots.
    Spline(SplineBlazeSettings),
}

impl Blaze {
    pub fn polynomial(settings: PolynomialBlazeSettings) -> Result<Self, AppError> {
        if settings.coeffs.is_empty() {
            return Err(AppError::config("Polynomial blaze needs at least one coefficient."));
        }
        Ok(Blaze::Polynomial(settings))
    }

    pub fn spline(settings: SplineBlazeSettings) -> Result<Self, AppError> {
        if settings.n_splines == 0 {
            return Err(AppError::config("Spline blaze needs n_splines >= 1."));
        }
        Ok(Blaze::Spline(settings))
    }
}

impl Component for Blaze {
    fn name(&self) -> &str {
        match self {
            Blaze::Polynomial(s) => &s.name,
            Blaze::Spline(s) => &s.name,
        }
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        Ok(match self {
            Blaze::Polynomial(s) => s
                .coeffs
                .iter()
                .enumerate()
                .map(|(k, t)| Parameter::from_triple(format!("{}_c{k}", s.name), *t))
                .collect(),
            Blaze::Spline(s) => (0..=s.n_splines)
                .map(|k| Parameter::from_triple(format!("{}_spline_{k}", s.name), s.spline))
                .collect(),
        })
    }
}

impl SpectralFactor for Blaze {
    fn build(&self, params: &[Parameter], _templates: &TemplateSet, grid: &ModelGrid) -> Vec<f64> {
        let mid = 0.5 * (grid.wave_min + grid.wave_max);
        let half = 0.5 * (grid.wave_max - grid.wave_min);
        match self {
            Blaze::Polynomial(_) => grid
                .wave
                .iter()
                .map(|w| {
                    let u = (w - mid) / half;
                    params.iter().rev().fold(0.0, |acc, p| acc * u + p.value)
                })
                .collect(),
            Blaze::Spline(s) => {
                let knots = linspace(grid.wave_min, grid.wave_max, s.n_splines + 1);
                let values: Vec<f64> = params.iter().map(|p| p.value).collect();
                let Some(spline) = CubicHermite::natural(&knots, &values) else {
                    return vec![f64::NAN; grid.len()];
                };
                grid.wave
                    .iter()
                    .map(|w| 1.0 + spline.eval(w.clamp(grid.wave_min, grid.wave_max)))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn templates() -> TemplateSet {
        TemplateSet {
            star: Vec::new(),
            fixed: BTreeMap::new(),
        }
    }

    #[test]
    fn polynomial_blaze_evaluates_in_scaled_abscissa() {
        let grid = ModelGrid::new(5000.0, 5010.0, 0.0, 11).unwrap();
        let blaze = Blaze::polynomial(PolynomialBlazeSettings {
            name: "blaze".into(),
            coeffs: vec![[0.5, 1.0, 1.5], [-1.0, 0.1, 1.0], [-1.0, -0.2, 1.0]],
        })
        .unwrap();
        let params = blaze.init_parameters(&dummy_obs()).unwrap();
        let b = blaze.build(&params, &templates(), &grid);
        assert!((b[5] - 1.0).abs() < 1e-12);
        assert!((b[10] - 0.9).abs() < 1e-12);
        assert!((b[0] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn spline_blaze_is_unity_plus_knot_values() {
        let grid = ModelGrid::new(5000.0, 5010.0, 1.0, 121).unwrap();
        let blaze = Blaze::spline(SplineBlazeSettings {
            name: "blaze".into(),
            n_splines: 4,
            spline: [-0.1, 0.02, 0.1],
        })
        .unwrap();
        let params = blaze.init_parameters(&dummy_obs()).unwrap();
        assert_eq!(params.len(), 5);
        let b = blaze.build(&params, &templates(), &grid);
        assert!(b.iter().all(|v| (v - 1.02).abs() < 1e-12));
    }

    fn dummy_obs() -> Observation {
        Observation {
            id: "x".into(),
            wave: None,
            flux: vec![1.0],
            flux_unc: vec![0.01],
            mask: vec![1.0],
            time_jd: 0.0,
            bc_vel: 0.0,
        }
    }
}
