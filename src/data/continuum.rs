//! Trial continuum fit used to vet spectra at ingestion.
//!
//! A low-order polynomial is fit to log flux with iterative, asymmetric sigma
//! clipping: absorption lines sit below the continuum, so the lower threshold
//! is much tighter than the upper one. A spectrum whose fit cannot be computed
//! is unusable and gets dropped by the collection.

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::{Polynomial, polyfit_weighted, weighted_stddev};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuumOptions {
    pub degree: usize,
    /// Clip residuals below `-nsigma[0]·σ` or above `nsigma[1]·σ`.
    pub nsigma: [f64; 2],
    pub max_iter: usize,
}

impl Default for ContinuumOptions {
    fn default() -> Self {
        Self {
            degree: 4,
            nsigma: [0.3, 3.0],
            max_iter: 50,
        }
    }
}

/// Fit a continuum to `y` (already in log space) at abscissae `x`.
pub fn fit_log_continuum(x: &[f64], y: &[f64], mask: &[f64], opts: &ContinuumOptions) -> Result<Polynomial, AppError> {
    let mut w: Vec<f64> = mask
        .iter()
        .zip(y)
        .zip(x)
        .map(|((m, v), x)| if *m > 0.5 && v.is_finite() && x.is_finite() { 1.0 } else { 0.0 })
        .collect();

    // Clipping stops before it would leave too few pixels to pin the polynomial.
    let n_start = w.iter().filter(|v| **v > 0.0).count();
    let min_keep = (2 * (opts.degree + 1)).max(n_start / 4);

    let mut poly = None;
    for _ in 0..opts.max_iter.max(1) {
        let p = polyfit_weighted(x, y, &w, opts.degree)
            .ok_or_else(|| AppError::data("Continuum fit failed: too few usable pixels."))?;
        let resid: Vec<f64> = x.iter().zip(y).map(|(x, v)| v - p.eval(*x)).collect();
        let sigma = weighted_stddev(&resid, &w);
        poly = Some(p);
        if !(sigma.is_finite() && sigma > 0.0) {
            break;
        }
        let next: Vec<f64> = resid
            .iter()
            .zip(&w)
            .map(|(r, w)| {
                if *w > 0.0 && (*r < -opts.nsigma[0] * sigma || *r > opts.nsigma[1] * sigma) {
                    0.0
                } else {
                    *w
                }
            })
            .collect();
        if next == w || next.iter().filter(|v| **v > 0.0).count() < min_keep {
            break;
        }
        w = next;
    }
    poly.ok_or_else(|| AppError::data("Continuum fit failed."))
}

/// Abscissa used for continuum work: the shipped wavelengths, or pixel indices.
pub fn abscissa(obs: &Observation) -> Vec<f64> {
    match &obs.wave {
        Some(w) => w.clone(),
        None => (0..obs.n_pix()).map(|i| i as f64).collect(),
    }
}

/// Trial continuum of a spectrum in flux units.
pub fn trial_continuum(obs: &Observation, opts: &ContinuumOptions) -> Result<Vec<f64>, AppError> {
    let x = abscissa(obs);
    let log_flux: Vec<f64> = obs.flux.iter().map(|f| if *f > 0.0 { f.ln() } else { f64::NAN }).collect();
    let poly = fit_log_continuum(&x, &log_flux, &obs.mask, opts).map_err(|e| e.context(&obs.id))?;
    let continuum: Vec<f64> = x.iter().map(|x| poly.eval(*x).exp()).collect();
    if continuum.iter().zip(&obs.mask).any(|(c, m)| *m > 0.5 && !c.is_finite()) {
        return Err(AppError::data(format!("{}: continuum fit is not finite.", obs.id)));
    }
    Ok(continuum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipping_ignores_absorption_lines() {
        let x: Vec<f64> = (0..300).map(|i| 5000.0 + 0.02 * i as f64).collect();
        let cont = |t: f64| 0.9 + 0.02 * (t - 5003.0);
        let flux: Vec<f64> = x
            .iter()
            .map(|&t| cont(t) * (1.0 - 0.6 * (-(t - 5002.0).powi(2) / 0.002).exp()))
            .collect();
        let obs = Observation {
            id: "lines".into(),
            wave: Some(x.clone()),
            flux,
            flux_unc: vec![0.01; 300],
            mask: vec![1.0; 300],
            time_jd: 0.0,
            bc_vel: 0.0,
        };
        let c = trial_continuum(&obs, &ContinuumOptions::default()).unwrap();
        for i in [0, 100, 150, 299] {
            assert!((c[i] - cont(x[i])).abs() < 5e-3, "pixel {i}: {} vs {}", c[i], cont(x[i]));
        }
    }

    #[test]
    fn fully_masked_spectrum_fails() {
        let obs = Observation {
            id: "dead".into(),
            wave: None,
            flux: vec![1.0; 10],
            flux_unc: vec![0.1; 10],
            mask: vec![0.0; 10],
            time_jd: 0.0,
            bc_vel: 0.0,
        };
        let err = trial_continuum(&obs, &ContinuumOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_DATA);
    }
}
