//! Least-squares cubic spline through pooled rest-frame residuals.
//!
//! All selected spectra are deshifted into the stellar frame and pooled into
//! one sorted sample. Knots sit at roughly the detector pixel spacing (empty
//! intervals removed), so the spline resolves what the data can resolve and no
//! more. The spline is evaluated on the model grid and added to the template;
//! outside the knot span the template is left alone.

use crate::augment::{AugmentInput, apply_update};
use crate::error::AppError;
use crate::math::{BSpline, linspace, prune_empty_knots};

/// Knot inset (wavelength units) from the pooled sample's ends.
const KNOT_INSET: f64 = 0.01;

pub fn augment(input: &AugmentInput) -> Result<Vec<f64>, AppError> {
    let spec_w = input.spectrum_weights()?;

    let mut pooled: Vec<(f64, f64, f64)> = Vec::new();
    for (s, &w_s) in spec_w.iter().enumerate() {
        if w_s <= 0.0 {
            continue;
        }
        let wave = input.rest_frame_wave(s);
        let resid = input.residuals_for(s);
        let tell = input.telluric_weights_data(s);
        let mask = &input.observations[s].mask;
        for i in 0..wave.len() {
            let t = tell.as_ref().map_or(1.0, |t| t[i]);
            let w = w_s * mask[i] * t;
            if wave[i].is_finite() && resid[i].is_finite() && w.is_finite() && w > 0.0 {
                pooled.push((wave[i], resid[i], w));
            }
        }
    }
    if pooled.len() < 4 {
        log::warn!("Too few residual samples ({}) for a spline update; template unchanged.", pooled.len());
        return Ok(input.templates.star.clone());
    }
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    let x: Vec<f64> = pooled.iter().map(|p| p.0).collect();
    let y: Vec<f64> = pooled.iter().map(|p| p.1).collect();
    let total: f64 = pooled.iter().map(|p| p.2).sum();
    let w: Vec<f64> = pooled.iter().map(|p| p.2 / total).collect();
    let (lo, hi) = (x[0], x[x.len() - 1]);

    let n_knots = input.observations[0].n_pix();
    let knots = prune_empty_knots(&x, &linspace(lo + KNOT_INSET, hi - KNOT_INSET, n_knots));
    if knots.len() < 2 {
        log::warn!("Residual span too short for a spline update; template unchanged.");
        return Ok(input.templates.star.clone());
    }
    let spline = BSpline::fit_lsq(&x, &y, &w, &knots[1..knots.len() - 1], lo, hi)?;

    let (k_lo, k_hi) = (knots[0], knots[knots.len() - 1]);
    let delta: Vec<f64> = input
        .model
        .grid
        .wave
        .iter()
        .map(|&g| if g <= k_lo || g >= k_hi { 0.0 } else { spline.eval(g) })
        .collect();
    log::debug!(
        "Spline update: {} pooled samples, {} knots over [{k_lo:.4}, {k_hi:.4}].",
        x.len(),
        knots.len()
    );
    Ok(apply_update(&input.templates.star, &delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::tests::{fixture, input, interior_error};
    use crate::domain::{AugmenterSettings, NightsForTemplate};

    #[test]
    fn spline_update_recovers_the_true_template() {
        let f = fixture(3);
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let inp = input(&f, &settings, &nights, &[1, 1, 1]);

        let before = interior_error(&f, &f.templates.star);
        let after_t = augment(&inp).unwrap();
        let after = interior_error(&f, &after_t);
        assert!(after < 0.1 * before, "before {before}, after {after}");
        assert!(after_t.iter().all(|v| *v <= 1.0));
    }

    #[test]
    fn bootstrap_continuum_removal_keeps_lines() {
        let f = fixture(3);
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let mut inp = input(&f, &settings, &nights, &[1, 1, 1]);
        inp.bootstrap = true;
        let t = augment(&inp).unwrap();
        assert!(interior_error(&f, &t) < interior_error(&f, &f.templates.star));
        assert!(t.iter().all(|v| *v <= 1.0));
    }
}
