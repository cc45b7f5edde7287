//! Nightly binning of per-spectrum velocities.
//!
//! Spectra are assumed sorted by time and grouped into consecutive nights of
//! `n_obs_nights[k]` spectra each. Within a night:
//!
//! - optional outlier rejection: points further than `k` robust sigmas
//!   (`1.4826 × MAD` about the weighted median) are dropped; nights with two
//!   or fewer contributing points are never clipped
//! - the nightly velocity is the weighted mean of the survivors
//! - the uncertainty is the weighted standard deviation over `√n` (weighted
//!   standard error); NaN for a single surviving point

use crate::math::{median, weighted_mean, weighted_median, weighted_stddev};

/// Scale turning a MAD into a Gaussian-equivalent sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Bin per-spectrum `rvs` into nights. Returns `(nightly_rvs, nightly_unc)`.
///
/// Spectra with non-finite velocity or non-positive weight do not contribute; a
/// night without contributors is NaN.
pub fn compute_nightly_rvs(
    rvs: &[f64],
    weights: &[f64],
    n_obs_nights: &[usize],
    outlier_sigma: Option<f64>,
) -> (Vec<f64>, Vec<f64>) {
    let mut nightly = Vec::with_capacity(n_obs_nights.len());
    let mut unc = Vec::with_capacity(n_obs_nights.len());
    let mut start = 0;
    for &n in n_obs_nights {
        let end = (start + n).min(rvs.len());
        let (v, u) = bin_night(&rvs[start..end], &weights[start..end], outlier_sigma);
        nightly.push(v);
        unc.push(u);
        start = end;
    }
    (nightly, unc)
}

fn bin_night(rvs: &[f64], weights: &[f64], outlier_sigma: Option<f64>) -> (f64, f64) {
    let mut pairs: Vec<(f64, f64)> = rvs
        .iter()
        .zip(weights)
        .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
        .map(|(v, w)| (*v, *w))
        .collect();
    if pairs.is_empty() {
        return (f64::NAN, f64::NAN);
    }

    if let Some(k) = outlier_sigma {
        // Two points have no majority to clip against.
        if pairs.len() > 2 {
            let (v, w): (Vec<f64>, Vec<f64>) = pairs.iter().copied().unzip();
            let centre = weighted_median(&v, &w);
            let dev: Vec<f64> = v.iter().map(|x| (x - centre).abs()).collect();
            let sigma = MAD_TO_SIGMA * median(&dev);
            // A zero MAD means most points coincide; nothing sensible to reject against.
            if sigma > 0.0 {
                pairs.retain(|(x, _)| (x - centre).abs() <= k * sigma);
            }
        }
    }

    let (v, w): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
    let mean = weighted_mean(&v, &w);
    let unc = if v.len() > 1 {
        weighted_stddev(&v, &w) / (v.len() as f64).sqrt()
    } else {
        f64::NAN
    };
    (mean, unc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn equal_weights_give_nightly_means() {
        let rvs = [10.0, 12.0, 11.0, 20.0, 22.0];
        let (nightly, unc) = compute_nightly_rvs(&rvs, &[1.0; 5], &[3, 2], Some(5.0));
        assert_abs_diff_eq!(nightly[0], 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(nightly[1], 21.0, epsilon = 1e-12);
        // stddev 1 over √3
        assert_abs_diff_eq!(unc[0], 1.0 / 3f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn outlier_is_rejected() {
        let rvs = [10.0, 12.0, 11.0, 20.0, 22.0, 1000.0];
        let (nightly, _) = compute_nightly_rvs(&rvs, &[1.0; 6], &[3, 3], Some(5.0));
        assert_abs_diff_eq!(nightly[0], 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(nightly[1], 21.0, epsilon = 1e-12);

        let (kept, _) = compute_nightly_rvs(&rvs, &[1.0; 6], &[3, 3], None);
        assert!(kept[1] > 300.0);
    }

    #[test]
    fn outlier_is_rejected_in_a_three_two_layout() {
        let rvs = [10.0, 12.0, 1000.0, 20.0, 22.0];
        let (nightly, unc) = compute_nightly_rvs(&rvs, &[1.0; 5], &[3, 2], Some(5.0));
        assert_abs_diff_eq!(nightly[0], 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(nightly[1], 21.0, epsilon = 1e-12);
        // Unbiased weighted stddev √2 over √2.
        assert_abs_diff_eq!(unc[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn two_point_nights_are_never_clipped() {
        let (nightly, _) = compute_nightly_rvs(&[20.0, 1000.0], &[1.0; 2], &[2], Some(5.0));
        assert_abs_diff_eq!(nightly[0], 510.0, epsilon = 1e-12);
    }

    #[test]
    fn single_observation_has_undefined_uncertainty() {
        let (nightly, unc) = compute_nightly_rvs(&[5.0, 7.0], &[1.0, 0.0], &[1, 1], Some(5.0));
        assert_eq!(nightly[0], 5.0);
        assert!(unc[0].is_nan());
        assert!(nightly[1].is_nan());
    }

    #[test]
    fn weights_pull_the_mean() {
        let (nightly, _) = compute_nightly_rvs(&[0.0, 10.0], &[3.0, 1.0], &[2], None);
        assert_abs_diff_eq!(nightly[0], 2.5, epsilon = 1e-12);
    }
}
