//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV archives
//! - reloaded later for cross-order combination

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ParameterSet;

/// One extracted 1-D spectrum of one echelle order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Where the spectrum came from (file name or synthetic label).
    pub id: String,
    /// Optional per-pixel wavelength grid shipped with the data.
    ///
    /// Only needed by the fixed wavelength solution and to seed Lagrange set
    /// points when the blueprint does not give them.
    pub wave: Option<Vec<f64>>,
    pub flux: Vec<f64>,
    pub flux_unc: Vec<f64>,
    /// 1 = good, 0 = bad.
    pub mask: Vec<f64>,
    /// Barycentric Julian date of mid-exposure.
    pub time_jd: f64,
    /// Barycentric velocity correction (m/s).
    pub bc_vel: f64,
}

impl Observation {
    pub fn n_pix(&self) -> usize {
        self.flux.len()
    }

    /// Check array lengths agree.
    pub fn validate(&self) -> Result<(), AppError> {
        let n = self.flux.len();
        if n == 0 {
            return Err(AppError::config(format!("Spectrum '{}' is empty.", self.id)));
        }
        let wave_ok = self.wave.as_ref().is_none_or(|w| w.len() == n);
        if self.flux_unc.len() != n || self.mask.len() != n || !wave_ok {
            return Err(AppError::config(format!(
                "Spectrum '{}' has mismatched array lengths.",
                self.id
            )));
        }
        if !self.time_jd.is_finite() || !self.bc_vel.is_finite() {
            return Err(AppError::config(format!(
                "Spectrum '{}' has a non-finite time or barycentric velocity.",
                self.id
            )));
        }
        Ok(())
    }

    /// Number of pixels currently flagged good.
    pub fn n_good(&self) -> usize {
        self.mask.iter().filter(|m| **m > 0.5).count()
    }
}

/// Barycentric correction for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaryCorrection {
    pub bjd: f64,
    pub bc_vel: f64,
}

/// A `(wavelength, flux)` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
}

impl Template {
    pub fn new(wave: Vec<f64>, flux: Vec<f64>) -> Result<Self, AppError> {
        if wave.len() != flux.len() || wave.len() < 2 {
            return Err(AppError::config("Template needs at least two (wave, flux) rows of equal length."));
        }
        if wave.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(AppError::config("Template wavelengths must be strictly increasing."));
        }
        Ok(Self { wave, flux })
    }

    pub fn wave_range(&self) -> (f64, f64) {
        (self.wave[0], self.wave[self.wave.len() - 1])
    }
}

/// Outcome of one optimizer run for one spectrum at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub iteration: usize,
    pub best_parameters: ParameterSet,
    /// RMS of the residuals at the best fit. NaN when the fit failed.
    pub fit_metric: f64,
    pub n_function_calls: usize,
}

impl FitResult {
    pub fn failed(&self) -> bool {
        !self.fit_metric.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_validation_catches_length_mismatch() {
        let obs = Observation {
            id: "a".into(),
            wave: Some(vec![1.0, 2.0]),
            flux: vec![1.0, 1.0, 1.0],
            flux_unc: vec![0.01; 3],
            mask: vec![1.0; 3],
            time_jd: 2459000.5,
            bc_vel: 0.0,
        };
        assert!(obs.validate().is_err());
    }

    #[test]
    fn template_requires_increasing_wavelengths() {
        assert!(Template::new(vec![1.0, 1.0], vec![1.0, 1.0]).is_err());
        let t = Template::new(vec![1.0, 2.0, 3.0], vec![0.9, 1.0, 0.8]).unwrap();
        assert_eq!(t.wave_range(), (1.0, 3.0));
    }
}
