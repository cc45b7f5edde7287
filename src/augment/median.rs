//! Per-pixel weighted median of rest-frame residuals on the model grid.

use crate::augment::{AugmentInput, apply_update, combine_on_grid};
use crate::error::AppError;
use crate::math::weighted_median;

pub fn augment(input: &AugmentInput) -> Result<Vec<f64>, AppError> {
    let delta = combine_on_grid(input, weighted_median)?;
    Ok(apply_update(&input.templates.star, &delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::tests::{fixture, input, interior_error};
    use crate::domain::{AugmenterSettings, NightsForTemplate};

    #[test]
    fn constant_residuals_give_the_analytic_weighted_median() {
        let mut f = fixture(3);
        let levels = [-0.1, -0.2, -0.3];
        for (r, level) in f.residuals.iter_mut().zip(levels) {
            r.iter_mut().for_each(|v| *v = level);
        }
        // 1/rms² weights 1, 4, 1 (x10^4): the middle spectrum holds 2/3 of the weight.
        f.fit_rms = vec![0.01, 0.005, 0.01];
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let inp = input(&f, &settings, &nights, &[1, 1, 1]);
        let t = augment(&inp).unwrap();

        let mid = f.model.grid.wave.iter().position(|w| *w > 5002.5).unwrap();
        assert!((t[mid] - 0.8).abs() < 1e-9, "{}", t[mid]);

        // Half-weight property at the returned value.
        let w = [1.0, 4.0, 1.0];
        let m = t[mid] - 1.0;
        let below: f64 = levels.iter().zip(&w).filter(|(v, _)| **v < m - 1e-12).map(|p| p.1).sum();
        let above: f64 = levels.iter().zip(&w).filter(|(v, _)| **v > m + 1e-12).map(|p| p.1).sum();
        assert!(below <= 3.0 && above <= 3.0);
    }

    #[test]
    fn median_update_improves_the_template() {
        let f = fixture(3);
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let inp = input(&f, &settings, &nights, &[1, 1, 1]);
        let t = augment(&inp).unwrap();
        assert!(interior_error(&f, &t) < 0.2 * interior_error(&f, &f.templates.star));
        assert!(t.iter().all(|v| *v <= 1.0));
    }

    #[test]
    fn pixels_without_coverage_are_untouched() {
        let f = fixture(2);
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let inp = input(&f, &settings, &nights, &[1, 1]);
        let t = augment(&inp).unwrap();
        // The padded grid ends lie outside every spectrum.
        assert_eq!(t[0], f.templates.star[0]);
        assert_eq!(t[t.len() - 1], f.templates.star[t.len() - 1]);
    }
}
