//! Wavelength solutions mapping detector pixels to wavelength.

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::models::components::Component;
use crate::models::Parameter;

#[derive(Debug, Clone, Deserialize)]
pub struct LagrangeSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Three pixel positions spanning the detector. Defaults to 10%, 50% and 90%
    /// of the pixel range.
    #[serde(default)]
    pub base_pixel_set_points: Option<[usize; 3]>,
    /// `[lower, start, upper]` wavelength at each set point. When absent the data's
    /// own wavelength grid seeds them, widened by `set_point_window`.
    #[serde(default)]
    pub base_set_points: Option<[[f64; 3]; 3]>,
    #[serde(default = "default_window")]
    pub set_point_window: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixedSettings {
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_name() -> String {
    "wavelength_solution".to_string()
}

fn default_window() -> f64 {
    0.25
}

/// Wavelength solution variants.
#[derive(Debug, Clone)]
pub enum WavelengthSolution {
    /// Quadratic through three `(pixel, wavelength)` set points.
    Lagrange(LagrangeSettings),
    /// The wavelength grid shipped with the data, no free parameters.
    Fixed(FixedSettings),
}

impl WavelengthSolution {
    /// Data-grid wavelengths for `obs` under `params`.
    pub fn build(&self, params: &[Parameter], obs: &Observation) -> Vec<f64> {
        match self {
            WavelengthSolution::Lagrange(s) => {
                let n = obs.n_pix();
                let px = pixel_set_points(s, n).map(|p| p as f64);
                let w = [params[0].value, params[1].value, params[2].value];
                (0..n).map(|i| lagrange_quadratic(i as f64, &px, &w)).collect()
            }
            WavelengthSolution::Fixed(_) => obs.wave.clone().unwrap_or_else(|| vec![f64::NAN; obs.n_pix()]),
        }
    }

    /// Finite wavelength range covered by `build` (first/last finite sample).
    pub fn bounds(&self, params: &[Parameter], obs: &Observation) -> Option<(f64, f64)> {
        let wave = self.build(params, obs);
        let lo = wave.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);
        let hi = wave.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
        (lo < hi).then_some((lo, hi))
    }
}

fn pixel_set_points(s: &LagrangeSettings, n: usize) -> [usize; 3] {
    s.base_pixel_set_points.unwrap_or_else(|| {
        let last = n.saturating_sub(1);
        [last / 10, last / 2, last - last / 10]
    })
}

fn lagrange_quadratic(x: f64, px: &[f64; 3], w: &[f64; 3]) -> f64 {
    let l0 = (x - px[1]) * (x - px[2]) / ((px[0] - px[1]) * (px[0] - px[2]));
    let l1 = (x - px[0]) * (x - px[2]) / ((px[1] - px[0]) * (px[1] - px[2]));
    let l2 = (x - px[0]) * (x - px[1]) / ((px[2] - px[0]) * (px[2] - px[1]));
    w[0] * l0 + w[1] * l1 + w[2] * l2
}

impl Component for WavelengthSolution {
    fn name(&self) -> &str {
        match self {
            WavelengthSolution::Lagrange(s) => &s.name,
            WavelengthSolution::Fixed(s) => &s.name,
        }
    }

    fn init_parameters(&self, obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        match self {
            WavelengthSolution::Lagrange(s) => {
                let px = pixel_set_points(s, obs.n_pix());
                if px[0] >= px[1] || px[1] >= px[2] || px[2] >= obs.n_pix() {
                    return Err(AppError::config(format!(
                        "Wavelength set-point pixels {px:?} are not increasing within {} pixels.",
                        obs.n_pix()
                    )));
                }
                let triples = match (s.base_set_points, obs.wave.as_ref()) {
                    (Some(t), _) => t,
                    (None, Some(wave)) => {
                        let mut t = [[0.0; 3]; 3];
                        for (k, &p) in px.iter().enumerate() {
                            let w = wave[p];
                            if !w.is_finite() {
                                return Err(AppError::config(format!(
                                    "Spectrum '{}' has no finite wavelength at set-point pixel {p}.",
                                    obs.id
                                )));
                            }
                            t[k] = [w - s.set_point_window, w, w + s.set_point_window];
                        }
                        t
                    }
                    (None, None) => {
                        return Err(AppError::config(format!(
                            "Lagrange wavelength solution needs base_set_points or a wavelength column in '{}'.",
                            obs.id
                        )));
                    }
                };
                Ok(triples
                    .iter()
                    .enumerate()
                    .map(|(k, t)| Parameter::from_triple(format!("{}_set_point_{}", s.name, k + 1), *t))
                    .collect())
            }
            WavelengthSolution::Fixed(_) => {
                if obs.wave.is_none() {
                    return Err(AppError::config(format!(
                        "Fixed wavelength solution needs a wavelength column in '{}'.",
                        obs.id
                    )));
                }
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(n: usize) -> Observation {
        Observation {
            id: "x".into(),
            wave: Some((0..n).map(|i| 5000.0 + 0.01 * i as f64 + 1e-7 * (i * i) as f64).collect()),
            flux: vec![1.0; n],
            flux_unc: vec![0.01; n],
            mask: vec![1.0; n],
            time_jd: 0.0,
            bc_vel: 0.0,
        }
    }

    #[test]
    fn lagrange_reproduces_quadratic_data_grid() {
        let o = obs(101);
        let ws = WavelengthSolution::Lagrange(LagrangeSettings {
            name: "wls".into(),
            base_pixel_set_points: None,
            base_set_points: None,
            set_point_window: 0.1,
        });
        let params = ws.init_parameters(&o).unwrap();
        assert_eq!(params.len(), 3);
        let built = ws.build(&params, &o);
        for (a, b) in built.iter().zip(o.wave.as_ref().unwrap()) {
            assert!((a - b).abs() < 1e-9);
        }
        let (lo, hi) = ws.bounds(&params, &o).unwrap();
        assert!((lo - 5000.0).abs() < 1e-9 && hi > 5001.0);
    }

    #[test]
    fn fixed_solution_requires_a_wavelength_column() {
        let mut o = obs(10);
        let ws = WavelengthSolution::Fixed(FixedSettings { name: "w".into() });
        assert!(ws.init_parameters(&o).unwrap().is_empty());
        o.wave = None;
        assert!(ws.init_parameters(&o).is_err());
    }
}
