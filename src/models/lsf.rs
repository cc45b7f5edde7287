//! Hermite–Gaussian line spread function.
//!
//! The kernel is `ψ_0(x/σ) + Σ_k a_k ψ_k(x/σ)` sampled on the high-resolution
//! grid spacing and normalised to unit sum. Its half-width is fixed from the
//! width's upper bound so every evaluation uses the same kernel length.

use serde::Deserialize;

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::hermite_functions;
use crate::models::components::Component;
use crate::models::Parameter;

/// Kernel half-width in units of the maximum Gaussian width.
const KERNEL_SIGMAS: f64 = 5.0;

#[derive(Debug, Clone, Deserialize)]
pub struct HermiteLsfSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Highest Hermite degree beyond the Gaussian core.
    #[serde(default)]
    pub hermdeg: usize,
    /// `[lower, start, upper]` Gaussian width (wavelength units).
    pub width: [f64; 3],
    /// `[lower, start, upper]` shared by every Hermite coefficient.
    #[serde(default = "default_ak")]
    pub ak: [f64; 3],
}

fn default_name() -> String {
    "lsf".to_string()
}

fn default_ak() -> [f64; 3] {
    [-0.03, 0.001, 0.2]
}

#[derive(Debug, Clone)]
pub struct HermiteLsf {
    settings: HermiteLsfSettings,
}

impl HermiteLsf {
    pub fn new(settings: HermiteLsfSettings) -> Result<Self, AppError> {
        let [lo, _, hi] = settings.width;
        if !(lo > 0.0 && hi >= lo) {
            return Err(AppError::config("LSF width bounds must be positive and ordered."));
        }
        Ok(Self { settings })
    }

    /// Number of kernel samples either side of the centre for grid spacing `dl`.
    pub fn half_width(&self, dl: f64) -> usize {
        (KERNEL_SIGMAS * self.settings.width[2] / dl).ceil().max(1.0) as usize
    }

    /// Build the normalised kernel. Returns NaNs when the kernel sums to ≤ 0.
    pub fn kernel(&self, params: &[Parameter], dl: f64) -> Vec<f64> {
        let sigma = params[0].value;
        let deg = self.settings.hermdeg;
        let h = self.half_width(dl);
        let mut k: Vec<f64> = (0..=2 * h)
            .map(|i| {
                let x = (i as f64 - h as f64) * dl / sigma;
                let psi = hermite_functions(x, deg);
                psi[0] + (1..=deg).map(|j| params[j].value * psi[j]).sum::<f64>()
            })
            .collect();
        let s: f64 = k.iter().sum();
        if !(s > 0.0) || !s.is_finite() {
            return vec![f64::NAN; k.len()];
        }
        k.iter_mut().for_each(|v| *v /= s);
        k
    }

    /// Current Gaussian width.
    pub fn width(&self, params: &[Parameter]) -> f64 {
        params[0].value
    }
}

impl Component for HermiteLsf {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn init_parameters(&self, _obs: &Observation) -> Result<Vec<Parameter>, AppError> {
        let n = &self.settings.name;
        let mut out = vec![Parameter::from_triple(format!("{n}_width"), self.settings.width)];
        for k in 1..=self.settings.hermdeg {
            out.push(Parameter::from_triple(format!("{n}_a{k}"), self.settings.ak));
        }
        Ok(out)
    }
}
