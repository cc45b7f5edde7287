//! Brute-force cross-correlation against the forward model.
//!
//! Rather than correlating a binary mask, the stellar factor is moved over a
//! velocity grid while every other factor stays at the given parameters, and the
//! RMS between model and data is recorded for each trial. The resulting surface
//! behaves like an inverted absorption line: its minimum is the velocity
//! estimate and its shape gives the bisector span.

use crate::domain::{Observation, XcorrOptions};
use crate::fit::rms_metric;
use crate::math::{linspace, nan_argmin};
use crate::models::{ParameterSet, SpectralModel, TemplateSet};
use crate::models::star::StarModel;

/// Result of a full cross-correlation run.
#[derive(Debug, Clone, PartialEq)]
pub struct CcfResult {
    pub vels: Vec<f64>,
    /// RMS at each trial velocity.
    pub ccf: Vec<f64>,
    /// Best stellar velocity (observatory frame), refined by a parabola through
    /// the three samples around the grid minimum.
    pub best_vel: f64,
    /// Shallow-minus-deep bisector velocity (m/s). NaN when the profile is too
    /// flat or too narrow to bisect.
    pub bisector_span: f64,
}

/// Symmetric velocity grid `centre ± half_range` with spacing `step`.
pub fn velocity_grid(centre: f64, half_range: f64, step: f64) -> Vec<f64> {
    let n = (2.0 * half_range / step).round() as usize + 1;
    linspace(centre - half_range, centre + half_range, n.max(3))
}

/// RMS surface of the model against data with the star moved over `vels`.
pub fn ccf_surface(
    model: &SpectralModel,
    params: &ParameterSet,
    templates: &TemplateSet,
    obs: &Observation,
    vels: &[f64],
) -> Vec<f64> {
    let parts = model.parts(params, templates, obs);
    vels.iter()
        .map(|&v| {
            let star = StarModel::shift(&templates.star, &model.grid.wave, v);
            let flux = model.compose(&parts, Some(&star), None);
            rms_metric(&obs.flux, &flux, &obs.mask, 0)
        })
        .collect()
}

/// Pre-fit velocity prior: coarse search around `-bc_vel`.
///
/// Returns `None` when every trial evaluates to NaN.
pub fn crude_brute_force(
    model: &SpectralModel,
    params: &ParameterSet,
    templates: &TemplateSet,
    obs: &Observation,
    opts: &XcorrOptions,
) -> Option<f64> {
    let vels = velocity_grid(-obs.bc_vel, opts.crude_range, opts.crude_step);
    let ccf = ccf_surface(model, params, templates, obs, &vels);
    nan_argmin(&ccf).map(|i| vels[i])
}

/// Per-iteration CCF around `centre` plus the bisector span.
pub fn ccf(
    model: &SpectralModel,
    params: &ParameterSet,
    templates: &TemplateSet,
    obs: &Observation,
    centre: f64,
    opts: &XcorrOptions,
) -> CcfResult {
    let vels = velocity_grid(centre, opts.range, opts.step);
    let ccf = ccf_surface(model, params, templates, obs, &vels);
    let best_vel = refine_minimum(&vels, &ccf).unwrap_or(f64::NAN);
    let bisector_span = bisector_span(&vels, &ccf, opts.n_bisector_levels);
    CcfResult {
        vels,
        ccf,
        best_vel,
        bisector_span,
    }
}

/// Grid minimum refined with a three-point parabola.
pub fn refine_minimum(vels: &[f64], ccf: &[f64]) -> Option<f64> {
    let i = nan_argmin(ccf)?;
    if i == 0 || i + 1 >= ccf.len() {
        return Some(vels[i]);
    }
    let (y0, y1, y2) = (ccf[i - 1], ccf[i], ccf[i + 1]);
    let denom = y0 - 2.0 * y1 + y2;
    if !(denom.is_finite() && denom > 0.0) {
        return Some(vels[i]);
    }
    let h = vels[i + 1] - vels[i];
    let offset = 0.5 * (y0 - y2) / denom;
    Some(vels[i] + offset.clamp(-1.0, 1.0) * h)
}

/// Bisector span of an RMS surface.
///
/// The surface is normalised so the core sits at 0 and the highest wing at 1;
/// "depth" below is measured from that continuum. The span is the mean bisector
/// over 10–40% depth minus the mean over 60–90% depth.
pub fn bisector_span(vels: &[f64], ccf: &[f64], n_levels: usize) -> f64 {
    let Some(core) = nan_argmin(ccf) else {
        return f64::NAN;
    };
    let finite = ccf.iter().copied().filter(|v| v.is_finite());
    let top = finite.fold(f64::NEG_INFINITY, f64::max);
    let bottom = ccf[core];
    if !(top > bottom) || n_levels < 2 {
        return f64::NAN;
    }
    let profile: Vec<f64> = ccf.iter().map(|v| (v - bottom) / (top - bottom)).collect();

    let mut shallow = Vec::new();
    let mut deep = Vec::new();
    for depth in linspace(0.1, 0.9, n_levels) {
        let level = 1.0 - depth;
        let (Some(left), Some(right)) = (
            crossing(vels, &profile, core, level, -1),
            crossing(vels, &profile, core, level, 1),
        ) else {
            continue;
        };
        let mid = 0.5 * (left + right);
        if depth <= 0.4 + 1e-12 {
            shallow.push(mid);
        } else if depth >= 0.6 - 1e-12 {
            deep.push(mid);
        }
    }
    if shallow.is_empty() || deep.is_empty() {
        return f64::NAN;
    }
    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    mean(&shallow) - mean(&deep)
}

/// Walk outward from `core` in direction `dir` until the profile reaches `level`;
/// linear interpolation between the bracketing samples.
fn crossing(vels: &[f64], profile: &[f64], core: usize, level: f64, dir: isize) -> Option<f64> {
    let mut i = core as isize;
    loop {
        let j = i + dir;
        if j < 0 || j as usize >= profile.len() {
            return None;
        }
        let (a, b) = (profile[i as usize], profile[j as usize]);
        if !b.is_finite() {
            return None;
        }
        if b >= level {
            let t = if b > a { (level - a) / (b - a) } else { 0.0 };
            let (va, vb) = (vels[i as usize], vels[j as usize]);
            return Some(va + t * (vb - va));
        }
        i = j;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitSettings;
    use crate::models::registry::ComponentSet;
    use crate::models::star::StarSettings;
    use crate::models::wavelength::{FixedSettings, WavelengthSolution};

    fn line_star(wave: &[f64]) -> Vec<f64> {
        wave.iter()
            .map(|w| {
                let mut f = 1.0;
                for c in [5001.0, 5002.3, 5003.1, 5004.6] {
                    f *= 1.0 - 0.6 * (-(w - c).powi(2) / (2.0 * 0.03f64.powi(2))).exp();
                }
                f
            })
            .collect()
    }

    fn setup(injected: f64) -> (SpectralModel, TemplateSet, Observation, ParameterSet) {
        let n = 600;
        let wave: Vec<f64> = (0..n).map(|i| 5000.0 + 0.01 * i as f64).collect();
        let mut obs = Observation {
            id: "ccf".into(),
            wave: Some(wave.clone()),
            flux: vec![1.0; n],
            flux_unc: vec![0.01; n],
            mask: vec![1.0; n],
            time_jd: 0.0,
            bc_vel: 0.0,
        };
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
            resolution_factor: 8,
            wave_pad: 1.0,
            ..FitSettings::default()
        };
        let model = SpectralModel::new(components, std::slice::from_ref(&obs), &settings).unwrap();
        let (mut templates, _) = model.load_templates().unwrap();
        templates.star = line_star(&model.grid.wave);
        let mut params = model.initial_parameters(&obs).unwrap();
        params.set_value(0, injected);
        let (_, flux) = model.build(&params, &templates, &obs, true);
        obs.flux = flux;
        params.set_value(0, 0.0);
        (model, templates, obs, params)
    }

    #[test]
    fn ccf_recovers_injected_shift() {
        let injected = 1234.0;
        let (model, templates, obs, params) = setup(injected);
        let opts = XcorrOptions {
            range: 5000.0,
            step: 100.0,
            ..XcorrOptions::default()
        };
        let res = ccf(&model, &params, &templates, &obs, 0.0, &opts);
        assert!((res.best_vel - injected).abs() <= opts.step, "{}", res.best_vel);
        assert_eq!(res.vels.len(), res.ccf.len());
    }

    #[test]
    fn crude_search_lands_within_a_step() {
        let injected = -7300.0;
        let (model, templates, obs, params) = setup(injected);
        let opts = XcorrOptions {
            crude_range: 20_000.0,
            crude_step: 500.0,
            ..XcorrOptions::default()
        };
        let v = crude_brute_force(&model, &params, &templates, &obs, &opts).unwrap();
        assert!((v - injected).abs() <= 500.0);
    }

    #[test]
    fn symmetric_profile_has_zero_span() {
        let vels = linspace(-1000.0, 1000.0, 201);
        let ccf: Vec<f64> = vels.iter().map(|v| 1.0 - (-(v - 100.0f64).powi(2) / 2.0e4).exp()).collect();
        let bis = bisector_span(&vels, &ccf, 30);
        assert!(bis.abs() < 1e-6, "{bis}");
        let best = refine_minimum(&vels, &ccf).unwrap();
        assert!((best - 100.0).abs() < 1.0);
    }

    #[test]
    fn skewed_profile_has_nonzero_span() {
        let vels = linspace(-1000.0, 1000.0, 401);
        let ccf: Vec<f64> = vels
            .iter()
            .map(|&v| {
                let width = if v > 0.0 { 300.0 } else { 150.0 };
                1.0 - (-(v * v) / (2.0 * width * width)).exp()
            })
            .collect();
        assert!(bisector_span(&vels, &ccf, 30) > 10.0);
    }
}
