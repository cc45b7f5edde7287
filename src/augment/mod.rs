//! Stellar template augmentation.
//!
//! After every fit pass (except the last) the collection hands the augmenter a
//! read-only view of the pass: best-fit parameters, residuals, fit metrics and
//! the current templates. The augmenter returns a *new* stellar template; the
//! collection swaps it in before the next pass.
//!
//! Shared pieces live here:
//!
//! - spectrum selection (`all`, best night, explicit nights)
//! - weights: `1/rms²`, telluric depth², inverse barycentric-velocity histogram
//! - rest-frame deshifting of the data-grid wavelengths
//! - a rolling-quantile continuum estimate for the first flat-start pass
//! - the final clamp (`flux ≤ 1`, non-finite updates become zero)
//!
//! Strategy modules: `spline_lsq`, `median`, `average`, `global`.

pub mod average;
pub mod global;
pub mod median;
pub mod spline_lsq;

use crate::domain::{AugmenterKind, AugmenterSettings, NightsForTemplate, Observation};
use crate::error::AppError;
use crate::math::{CubicHermite, histogram, interp_fill, interp_nan, linspace, nan_argmax, rolling_quantile};
use crate::models::{ParameterSet, SpectralModel, TemplateSet};

/// Everything an augmenter may read about the finished pass.
#[derive(Debug, Clone, Copy)]
pub struct AugmentInput<'a> {
    pub model: &'a SpectralModel,
    pub templates: &'a TemplateSet,
    pub observations: &'a [Observation],
    /// Best-fit parameters of this pass, one per spectrum.
    pub params: &'a [ParameterSet],
    /// Data-grid wavelengths of this pass, one per spectrum.
    pub waves: &'a [Vec<f64>],
    /// `data − model` of this pass, one per spectrum.
    pub residuals: &'a [Vec<f64>],
    pub fit_rms: &'a [f64],
    pub n_obs_nights: &'a [usize],
    /// The stellar factor took part in this pass's fits.
    pub star_enabled: bool,
    /// The stellar template came from a file rather than a flat start. Residuals
    /// are then deshifted by the fitted stellar velocity, otherwise by the
    /// barycentric velocity.
    pub template_from_file: bool,
    /// First augmentation of a flat start: a rough continuum is removed from the
    /// residuals before they are combined.
    pub bootstrap: bool,
    pub settings: &'a AugmenterSettings,
    pub nights: &'a NightsForTemplate,
}

impl AugmentInput<'_> {
    pub fn n_spec(&self) -> usize {
        self.observations.len()
    }

    /// Velocity by which spectrum `s` is moved back to the stellar rest frame.
    pub fn rest_frame_vel(&self, s: usize) -> f64 {
        let fitted = self
            .model
            .star_vel_index()
            .filter(|_| self.template_from_file && self.star_enabled)
            .map(|i| self.params[s].value(i));
        fitted.unwrap_or(-self.observations[s].bc_vel)
    }

    /// Data-grid wavelengths of spectrum `s` in the stellar rest frame.
    pub fn rest_frame_wave(&self, s: usize) -> Vec<f64> {
        let factor = crate::math::doppler_factor(-self.rest_frame_vel(s));
        self.waves[s].iter().map(|w| w * factor).collect()
    }

    /// Residuals of spectrum `s`, with the bootstrap continuum removed when needed.
    pub fn residuals_for(&self, s: usize) -> Vec<f64> {
        let r = &self.residuals[s];
        if !self.bootstrap {
            return r.clone();
        }
        let continuum = estimate_continuum(
            &self.rest_frame_wave(s),
            r,
            self.settings.continuum_width,
            self.settings.continuum_knots,
            self.settings.continuum_quantile,
        );
        r.iter()
            .zip(&continuum)
            .map(|(v, c)| if c.is_finite() { v - c } else { *v })
            .collect()
    }

    /// Per-spectrum weights: `1/rms²` × barycentric number weight, zero for
    /// spectra outside the night selection.
    pub fn spectrum_weights(&self) -> Result<Vec<f64>, AppError> {
        let selected = select_spectra(self.nights, self.fit_rms, self.n_obs_nights)?;
        let mut w = rms_weights(self.fit_rms, self.star_enabled, self.settings.min_rms_weight);
        if *self.nights == NightsForTemplate::All {
            let bc: Vec<f64> = self.observations.iter().map(|o| o.bc_vel).collect();
            let number = bc_number_weights(&bc, self.settings.bc_hist_bins, self.settings.bc_hist_pad);
            w.iter_mut().zip(number).for_each(|(w, n)| *w *= n);
        }
        for (s, w) in w.iter_mut().enumerate() {
            if !selected.contains(&s) {
                *w = 0.0;
            }
        }
        if !w.iter().any(|v| *v > 0.0) {
            return Err(AppError::data("No spectrum carries weight for template augmentation."));
        }
        Ok(w)
    }

    /// Squared LSF-convolved telluric transmission of spectrum `s` on the model grid.
    pub fn telluric_weights_hr(&self, s: usize) -> Option<Vec<f64>> {
        self.model
            .tellurics_hr(&self.params[s], self.templates)
            .map(|t| t.into_iter().map(|v| v * v).collect())
    }

    /// Squared telluric transmission of spectrum `s` on its data grid (NaN outside).
    pub fn telluric_weights_data(&self, s: usize) -> Option<Vec<f64>> {
        let hr = self.telluric_weights_hr(s)?;
        Some(interp_nan(&self.waves[s], &self.model.grid.wave, &hr))
    }

    /// Residuals of spectrum `s` interpolated onto the model grid in the rest frame.
    ///
    /// Returns `(residuals_hr, good_hr)`. Only finite, unmasked pixels feed the
    /// shape-preserving interpolant; the mask is interpolated linearly and any
    /// value below one counts as bad. Pixels without a finite value are bad.
    pub fn residuals_on_grid(&self, s: usize) -> (Vec<f64>, Vec<bool>) {
        let grid = &self.model.grid.wave;
        let wave = self.rest_frame_wave(s);
        let resid = self.residuals_for(s);
        let mask = &self.observations[s].mask;

        let (x, y): (Vec<f64>, Vec<f64>) = wave
            .iter()
            .zip(&resid)
            .zip(mask)
            .filter(|((w, r), m)| w.is_finite() && r.is_finite() && **m > 0.5)
            .map(|((w, r), _)| (*w, *r))
            .unzip();
        let Some(interp) = CubicHermite::pchip(&x, &y) else {
            return (vec![f64::NAN; grid.len()], vec![false; grid.len()]);
        };
        let values = interp.eval_many(grid);

        let finite_wave: Vec<(f64, f64)> = wave
            .iter()
            .zip(mask)
            .filter(|(w, _)| w.is_finite())
            .map(|(w, m)| (*w, *m))
            .collect();
        let (mx, my): (Vec<f64>, Vec<f64>) = finite_wave.into_iter().unzip();
        let mask_hr = interp_fill(grid, &mx, &my, 0.0);
        let good = values
            .iter()
            .zip(&mask_hr)
            .map(|(v, m)| v.is_finite() && *m >= 1.0 - 1e-12)
            .collect();
        (values, good)
    }
}

/// Indices of the spectra allowed to contribute.
pub fn select_spectra(
    nights: &NightsForTemplate,
    fit_rms: &[f64],
    n_obs_nights: &[usize],
) -> Result<Vec<usize>, AppError> {
    let ranges = night_ranges(n_obs_nights);
    let picked: Vec<usize> = match nights {
        NightsForTemplate::All => (0..fit_rms.len()).collect(),
        NightsForTemplate::Best => {
            let snr: Vec<f64> = ranges
                .iter()
                .map(|r| {
                    let s: f64 = fit_rms[r.clone()]
                        .iter()
                        .filter(|v| v.is_finite() && **v > 0.0)
                        .map(|v| 1.0 / (v * v))
                        .sum();
                    s.sqrt()
                })
                .collect();
            let best = nan_argmax(&snr).ok_or_else(|| AppError::data("No night has a finite fit metric."))?;
            ranges[best].clone().collect()
        }
        NightsForTemplate::Nights(list) => {
            let mut out = Vec::new();
            for &night in list {
                let r = night
                    .checked_sub(1)
                    .and_then(|i| ranges.get(i))
                    .ok_or_else(|| {
                        AppError::config(format!(
                            "nights_for_template names night {night}, but only {} nights exist.",
                            ranges.len()
                        ))
                    })?;
                out.extend(r.clone());
            }
            out
        }
    };
    if picked.is_empty() {
        return Err(AppError::data("The night selection for the template holds no spectra."));
    }
    Ok(picked)
}

fn night_ranges(n_obs_nights: &[usize]) -> Vec<std::ops::Range<usize>> {
    let mut start = 0;
    n_obs_nights
        .iter()
        .map(|&n| {
            let r = start..start + n;
            start += n;
            r
        })
        .collect()
}

/// `1/rms²`; zero for failed fits. With the star enabled, spectra below
/// `min_weight` are dropped as poor fits.
pub fn rms_weights(fit_rms: &[f64], star_enabled: bool, min_weight: f64) -> Vec<f64> {
    fit_rms
        .iter()
        .map(|r| {
            if !(r.is_finite() && *r > 0.0) {
                return 0.0;
            }
            let w = 1.0 / (r * r);
            if star_enabled && w < min_weight { 0.0 } else { w }
        })
        .collect()
}

/// Inverse barycentric-velocity histogram weights, normalised over occupied bins.
///
/// Up-weights spectra whose barycentric velocity is rarely sampled so no single
/// Doppler position dominates the combined template.
pub fn bc_number_weights(bc_vels: &[f64], max_bins: usize, pad: f64) -> Vec<f64> {
    let n = bc_vels.len();
    if n == 0 {
        return Vec::new();
    }
    let lo = bc_vels.iter().copied().fold(f64::INFINITY, f64::min) - pad;
    let hi = bc_vels.iter().copied().fold(f64::NEG_INFINITY, f64::max) + pad;
    let bins = n.min(max_bins).max(1);
    let (counts, _) = histogram(bc_vels, bins, lo, hi);
    let norm: f64 = counts.iter().filter(|c| **c > 0).map(|c| 1.0 / *c as f64).sum();
    let width = (hi - lo) / bins as f64;
    bc_vels
        .iter()
        .map(|v| {
            if !(width > 0.0 && v.is_finite()) {
                return 1.0 / n as f64;
            }
            let k = (((v - lo) / width).floor() as usize).min(bins - 1);
            match counts[k] {
                0 => 0.0,
                c => 1.0 / c as f64 / norm,
            }
        })
        .collect()
}

/// Rough continuum of a residual vector: a running quantile through `n_knots`
/// anchor points joined by a shape-preserving interpolant. NaN outside the
/// anchored range. `x` must be ascending.
pub fn estimate_continuum(x: &[f64], y: &[f64], width: f64, n_knots: usize, quantile: f64) -> Vec<f64> {
    let coarse = rolling_quantile(x, y, width, quantile);
    let good: Vec<usize> = (0..y.len()).filter(|&i| y[i].is_finite() && x[i].is_finite()).collect();
    let (Some(&first), Some(&last)) = (good.first(), good.last()) else {
        return vec![f64::NAN; y.len()];
    };
    let mut kx = Vec::with_capacity(n_knots);
    let mut ky = Vec::with_capacity(n_knots);
    for pos in linspace(first as f64, last as f64, n_knots) {
        let i = pos as usize;
        if coarse[i].is_finite() && kx.last().is_none_or(|prev| x[i] > *prev) {
            kx.push(x[i]);
            ky.push(coarse[i]);
        }
    }
    match CubicHermite::pchip(&kx, &ky) {
        Some(c) => c.eval_many(x),
        None => vec![f64::NAN; y.len()],
    }
}

/// Add `delta` to `template`, treating non-finite updates as zero and clamping to ≤ 1.
pub fn apply_update(template: &[f64], delta: &[f64]) -> Vec<f64> {
    let mut clamped = 0usize;
    let out: Vec<f64> = template
        .iter()
        .zip(delta)
        .map(|(t, d)| {
            let v = if d.is_finite() { t + d } else { *t };
            if v > 1.0 {
                clamped += 1;
                1.0
            } else {
                v
            }
        })
        .collect();
    if clamped > 0 {
        log::debug!("Template update clamped {clamped} pixels to 1.");
    }
    out
}

/// Run the configured strategy and return the new stellar template.
pub fn augment_template(input: &AugmentInput) -> Result<Vec<f64>, AppError> {
    log::debug!("Augmenting stellar template ({}).", input.settings.kind.display_name());
    match input.settings.kind {
        AugmenterKind::CubicSplineLsq => spline_lsq::augment(input),
        AugmenterKind::WeightedMedian => median::augment(input),
        AugmenterKind::WeightedAverage => average::augment(input),
        AugmenterKind::GlobalFit => global::augment(input),
    }
}

/// Pooled per-pixel combination shared by the median and mean strategies.
///
/// `combine(values, weights)` receives the finite, positively weighted
/// contributions at one model pixel; pixels with no contribution get zero.
pub(crate) fn combine_on_grid(
    input: &AugmentInput,
    combine: impl Fn(&[f64], &[f64]) -> f64,
) -> Result<Vec<f64>, AppError> {
    let spec_w = input.spectrum_weights()?;
    let n_hr = input.model.grid.len();
    let mut values: Vec<Vec<f64>> = Vec::new();
    let mut weights: Vec<Vec<f64>> = Vec::new();
    for (s, &w_s) in spec_w.iter().enumerate() {
        if w_s <= 0.0 {
            continue;
        }
        let (resid, good) = input.residuals_on_grid(s);
        let tell = input.telluric_weights_hr(s);
        let w: Vec<f64> = (0..n_hr)
            .map(|i| {
                let t = tell.as_ref().map_or(1.0, |t| t[i]);
                if good[i] && t.is_finite() { w_s * t } else { 0.0 }
            })
            .collect();
        values.push(resid);
        weights.push(w);
    }

    let mut delta = vec![0.0; n_hr];
    let mut v = Vec::with_capacity(values.len());
    let mut w = Vec::with_capacity(values.len());
    for (i, d) in delta.iter_mut().enumerate() {
        v.clear();
        w.clear();
        for (vals, wts) in values.iter().zip(&weights) {
            if wts[i] > 0.0 && vals[i].is_finite() {
                v.push(vals[i]);
                w.push(wts[i]);
            }
        }
        if v.is_empty() {
            continue;
        }
        let c = combine(&v, &w);
        *d = if c.is_finite() { c } else { 0.0 };
    }
    Ok(delta)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::domain::FitSettings;
    use crate::models::ComponentSet;
    use crate::models::star::{StarModel, StarSettings};
    use crate::models::wavelength::{FixedSettings, WavelengthSolution};

    /// Deep, narrow absorption lines.
    pub(crate) fn line_star(wave: &[f64]) -> Vec<f64> {
        wave.iter()
            .map(|w| {
                let mut f = 1.0;
                for c in [5001.0, 5002.2, 5003.5, 5004.1] {
                    f *= 1.0 - 0.5 * (-(w - c).powi(2) / (2.0 * 0.05f64.powi(2))).exp();
                }
                f
            })
            .collect()
    }

    /// Star-only model with a fixed wavelength grid; the "true" template is
    /// returned alongside so tests can check convergence towards it.
    pub(crate) struct Fixture {
        pub model: SpectralModel,
        pub templates: TemplateSet,
        pub truth: Vec<f64>,
        pub observations: Vec<Observation>,
        pub params: Vec<ParameterSet>,
        pub waves: Vec<Vec<f64>>,
        pub residuals: Vec<Vec<f64>>,
        pub fit_rms: Vec<f64>,
    }

    pub(crate) fn fixture(n_spec: usize) -> Fixture {
        let n = 400;
        let wave: Vec<f64> = (0..n).map(|i| 5000.0 + 0.0125 * i as f64).collect();
        let observations: Vec<Observation> = (0..n_spec)
            .map(|s| Observation {
                id: format!("s{s}"),
                wave: Some(wave.clone()),
                flux: vec![1.0; n],
                flux_unc: vec![0.01; n],
                mask: vec![1.0; n],
                time_jd: 2_459_000.0 + s as f64,
                bc_vel: -3000.0 + 500.0 * s as f64,
            })
            .collect();
        let components = ComponentSet {
            wavelength_solution: WavelengthSolution::Fixed(FixedSettings { name: "wls".into() }),
            star: Some(StarModel::new(StarSettings {
                name: "star".into(),
                input_file: None,
                vel: [-50_000.0, 0.0, 50_000.0],
            })),
            gas_cell: None,
            tellurics: None,
            fringing: None,
            residual_lab: None,
            lsf: None,
            blaze: None,
        };
        let settings = FitSettings {
            resolution_factor: 4,
            wave_pad: 0.5,
            ..FitSettings::default()
        };
        let model = SpectralModel::new(components, &observations, &settings).unwrap();
        let (templates, _) = model.load_templates().unwrap();
        let truth = line_star(&model.grid.wave);

        let mut truth_set = templates.clone();
        truth_set.star = truth.clone();
        let mut obs_out = Vec::new();
        let mut params = Vec::new();
        let mut waves = Vec::new();
        let mut residuals = Vec::new();
        for mut obs in observations {
            let mut p = model.initial_parameters(&obs).unwrap();
            p.set_value(0, -obs.bc_vel);
            let (w, data) = model.build(&p, &truth_set, &obs, true);
            obs.flux = data.clone();
            let (_, m) = model.build(&p, &templates, &obs, true);
            residuals.push(data.iter().zip(&m).map(|(d, m)| d - m).collect());
            waves.push(w);
            params.push(p);
            obs_out.push(obs);
        }
        Fixture {
            model,
            templates,
            truth,
            observations: obs_out,
            params,
            waves,
            residuals,
            fit_rms: vec![0.01; n_spec],
        }
    }

    pub(crate) fn input<'a>(
        f: &'a Fixture,
        settings: &'a AugmenterSettings,
        nights: &'a NightsForTemplate,
        n_obs_nights: &'a [usize],
    ) -> AugmentInput<'a> {
        AugmentInput {
            model: &f.model,
            templates: &f.templates,
            observations: &f.observations,
            params: &f.params,
            waves: &f.waves,
            residuals: &f.residuals,
            fit_rms: &f.fit_rms,
            n_obs_nights,
            star_enabled: true,
            template_from_file: false,
            bootstrap: false,
            settings,
            nights,
        }
    }

    /// Mean absolute template error over the data-covered interior.
    pub(crate) fn interior_error(f: &Fixture, template: &[f64]) -> f64 {
        let (lo, hi) = (5000.2, 5004.8);
        let idx: Vec<usize> = (0..f.model.grid.len())
            .filter(|&i| f.model.grid.wave[i] > lo && f.model.grid.wave[i] < hi)
            .collect();
        idx.iter().map(|&i| (template[i] - f.truth[i]).abs()).sum::<f64>() / idx.len() as f64
    }

    #[test]
    fn best_night_has_highest_coadded_snr() {
        let rms = [0.02, 0.02, 0.01, 0.01, 0.05];
        let picked = select_spectra(&NightsForTemplate::Best, &rms, &[2, 2, 1]).unwrap();
        assert_eq!(picked, vec![2, 3]);
        let picked = select_spectra(&NightsForTemplate::Nights(vec![3, 1]), &rms, &[2, 2, 1]).unwrap();
        assert_eq!(picked, vec![4, 0, 1]);
        assert!(select_spectra(&NightsForTemplate::Nights(vec![4]), &rms, &[2, 2, 1]).is_err());
    }

    #[test]
    fn number_weights_favour_sparse_bins() {
        let w = bc_number_weights(&[0.0, 1.0, 2.0, 100.0], 10, 1.0);
        assert!(w[3] > w[0]);
        assert!((w[0] - w[1]).abs() < 1e-15);
        // One spectrum per occupied bin sums to one.
        assert!((w[0] + w[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn poor_fits_lose_weight_once_the_star_is_on() {
        let on = rms_weights(&[0.2, 0.01, f64::NAN], true, 100.0);
        assert_eq!(on[0], 0.0);
        assert_abs_diff_eq!(on[1], 10_000.0, epsilon = 1e-9);
        assert_eq!(on[2], 0.0);
        // 1/0.2² is not exact in binary floating point.
        let off = rms_weights(&[0.2, 0.25], false, 100.0);
        assert_abs_diff_eq!(off[0], 25.0, epsilon = 1e-12);
        assert_eq!(off[1], 16.0);
    }

    #[test]
    fn update_clamps_and_ignores_nan() {
        let out = apply_update(&[0.9, 0.5, 0.7], &[0.3, f64::NAN, -0.2]);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], 0.5);
        assert!((out[2] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn continuum_tracks_upper_envelope() {
        let x: Vec<f64> = (0..500).map(|i| i as f64 * 0.05).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 0.1 * v / 25.0 - if i % 10 == 0 { 0.5 } else { 0.0 })
            .collect();
        let c = estimate_continuum(&x, &y, 7.0, 5, 0.9);
        let mid = 250;
        assert!((c[mid] - 0.1 * x[mid] / 25.0).abs() < 0.02, "{}", c[mid]);
    }

    #[test]
    fn flat_start_deshifts_by_barycentric_velocity() {
        let f = fixture(2);
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let mut inp = input(&f, &settings, &nights, &[1, 1]);
        assert_eq!(inp.rest_frame_vel(1), 2500.0);
        inp.template_from_file = true;
        assert_eq!(inp.rest_frame_vel(1), f.params[1].value(0));
    }
}
