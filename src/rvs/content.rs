//! Photon-limited velocity precision ("RV content") of a stellar template.
//!
//! For a spectrum with `A_i` photo-electrons in pixel `i`,
//!
//! `σ_v = c / sqrt(Σ_i λ_i² (dA/dλ)_i² / A_i)`
//!
//! The template is first blurred by a Gaussian LSF and resampled onto a
//! detector-like grid, so the number reflects what the instrument can see.

use crate::math::{SPEED_OF_LIGHT, convolve_same, gaussian_kernel, interp_nan, linspace};

/// Velocity precision (m/s) of `(wave, flux)` at continuum signal-to-noise `snr`.
///
/// `lsf_sigma` is in wavelength units; `n_detector_pix` sets the resampled grid.
/// Returns NaN when the template carries no gradient information.
pub fn rv_content(wave: &[f64], flux: &[f64], snr: f64, lsf_sigma: Option<f64>, n_detector_pix: usize) -> f64 {
    if wave.len() < 3 || n_detector_pix < 3 || !(snr > 0.0) {
        return f64::NAN;
    }
    let dl_hr = (wave[wave.len() - 1] - wave[0]) / (wave.len() - 1) as f64;
    let blurred = match lsf_sigma {
        Some(sigma) if sigma > 0.0 && dl_hr > 0.0 => {
            let half = (5.0 * sigma / dl_hr).ceil() as usize;
            convolve_same(flux, &gaussian_kernel(sigma / dl_hr, half))
        }
        _ => flux.to_vec(),
    };

    let det_wave = linspace(wave[0], wave[wave.len() - 1], n_detector_pix);
    let det_flux = interp_nan(&det_wave, wave, &blurred);
    let photons: Vec<f64> = det_flux.iter().map(|f| f * snr * snr).collect();

    let mut total = 0.0;
    for i in 1..n_detector_pix - 1 {
        let a = photons[i];
        if !(a > 0.0) {
            continue;
        }
        let slope = (photons[i + 1] - photons[i - 1]) / (det_wave[i + 1] - det_wave[i - 1]);
        if slope.is_finite() {
            total += det_wave[i].powi(2) * slope * slope / a;
        }
    }
    if total > 0.0 {
        SPEED_OF_LIGHT / total.sqrt()
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(depth: f64) -> (Vec<f64>, Vec<f64>) {
        let wave = linspace(5000.0, 5010.0, 8001);
        let flux = wave
            .iter()
            .map(|w| {
                let mut f = 1.0;
                for k in 0..20 {
                    let c = 5000.25 + 0.5 * k as f64;
                    f *= 1.0 - depth * (-(w - c).powi(2) / (2.0 * 0.02f64.powi(2))).exp();
                }
                f
            })
            .collect();
        (wave, flux)
    }

    #[test]
    fn precision_scales_inversely_with_snr() {
        let (w, f) = spectrum(0.5);
        let a = rv_content(&w, &f, 100.0, Some(0.02), 1000);
        let b = rv_content(&w, &f, 200.0, Some(0.02), 1000);
        assert!((a / b - 2.0).abs() < 1e-9);
    }

    #[test]
    fn deeper_lines_carry_more_information() {
        let (w, shallow) = spectrum(0.1);
        let (_, deep) = spectrum(0.6);
        assert!(rv_content(&w, &deep, 100.0, None, 1000) < rv_content(&w, &shallow, 100.0, None, 1000));
    }

    #[test]
    fn featureless_template_is_nan() {
        let w = linspace(5000.0, 5010.0, 100);
        assert!(rv_content(&w, &vec![1.0; 100], 100.0, None, 50).is_nan());
    }
}
