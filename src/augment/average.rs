//! Per-pixel weighted mean of rest-frame residuals with one sigma-clipping pass.

use crate::augment::{AugmentInput, apply_update, combine_on_grid};
use crate::error::AppError;
use crate::math::{weighted_mean, weighted_stddev};

/// Weighted mean after dropping values further than `clip` weighted standard
/// deviations from the first-pass mean.
pub fn clipped_weighted_mean(values: &[f64], weights: &[f64], clip: f64) -> f64 {
    let mean = weighted_mean(values, weights);
    let sd = weighted_stddev(values, weights);
    if !(sd.is_finite() && sd > 0.0) {
        return mean;
    }
    let kept: Vec<f64> = values
        .iter()
        .zip(weights)
        .map(|(v, w)| if (v - mean).abs() > clip * sd { 0.0 } else { *w })
        .collect();
    weighted_mean(values, &kept)
}

pub fn augment(input: &AugmentInput) -> Result<Vec<f64>, AppError> {
    let clip = input.settings.average_clip_sigma;
    let delta = combine_on_grid(input, |v, w| clipped_weighted_mean(v, w, clip))?;
    Ok(apply_update(&input.templates.star, &delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::tests::{fixture, input};
    use crate::domain::{AugmenterSettings, NightsForTemplate};

    #[test]
    fn single_outlier_is_clipped() {
        let mut v = vec![0.0; 11];
        v.push(-1.0);
        let w = vec![1.0; 12];
        assert!(clipped_weighted_mean(&v, &w, 3.0).abs() < 1e-15);
        // Without clipping the outlier drags the mean.
        assert!(weighted_mean(&v, &w) < -0.08);
    }

    #[test]
    fn outlying_spectrum_does_not_move_the_template() {
        let mut f = fixture(12);
        for (s, r) in f.residuals.iter_mut().enumerate() {
            let level = if s == 5 { -0.9 } else { -0.05 };
            r.iter_mut().for_each(|v| *v = level);
        }
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::Nights((1..=12).collect());
        let n_obs = vec![1; 12];
        let inp = input(&f, &settings, &nights, &n_obs);
        let t = augment(&inp).unwrap();
        let mid = f.model.grid.wave.iter().position(|w| *w > 5002.5).unwrap();
        assert!((t[mid] - 0.95).abs() < 1e-9, "{}", t[mid]);
        assert!(t.iter().all(|v| *v <= 1.0));
    }
}
