//! Joint fit of every stellar template pixel against all spectra at once.
//!
//! Every non-stellar factor is frozen at the pass's best fit, as is each
//! spectrum's renormalisation scale. The template flux on the model grid is the
//! only free vector. The loss is the weighted RMS over all spectra and pixels:
//!
//! `L = sqrt(Σ w (m − d)² / Σ w)`
//!
//! Each spectrum's model is a chain of linear maps applied to the template:
//! Doppler shift (linear resampling), multiplication by the frozen factors,
//! LSF convolution, blaze over scale, and linear resampling onto the data grid.
//! The gradient is pushed back through the transposes of those maps and the
//! template is updated with Adam for a fixed number of epochs.

use crate::augment::{AugmentInput, apply_update, select_spectra};
use crate::error::AppError;
use crate::math::{LinearInterp, convolve_same, convolve_same_transpose};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPS: f64 = 1e-8;
const LOG_EVERY: usize = 50;

/// First-order optimizer state for one parameter vector.
#[derive(Debug, Clone)]
struct Adam {
    lr: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    fn new(n: usize, lr: f64) -> Self {
        Self {
            lr,
            m: vec![0.0; n],
            v: vec![0.0; n],
            t: 0,
        }
    }

    fn step(&mut self, x: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let c1 = 1.0 - BETA1.powi(self.t);
        let c2 = 1.0 - BETA2.powi(self.t);
        for ((xi, g), (m, v)) in x.iter_mut().zip(grad).zip(self.m.iter_mut().zip(self.v.iter_mut())) {
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            *xi -= self.lr * (*m / c1) / ((*v / c2).sqrt() + EPS);
        }
    }
}

/// One spectrum's frozen part of the model chain.
struct Frozen {
    shift: LinearInterp,
    sample: LinearInterp,
    nostar: Vec<f64>,
    additive: Option<Vec<f64>>,
    kernel: Option<Vec<f64>>,
    blaze_over_scale: Vec<f64>,
    data: Vec<f64>,
    weights: Vec<f64>,
}

impl Frozen {
    fn model(&self, star: &[f64]) -> Vec<f64> {
        let mut hr = self.shift.forward(star);
        hr.iter_mut().zip(&self.nostar).for_each(|(h, n)| *h *= n);
        if let Some(add) = &self.additive {
            hr.iter_mut().zip(add).for_each(|(h, a)| *h += a);
        }
        let mut conv = match &self.kernel {
            Some(k) => convolve_same(&hr, k),
            None => hr,
        };
        conv.iter_mut().zip(&self.blaze_over_scale).for_each(|(c, b)| *c *= b);
        self.sample.forward(&conv)
    }

    /// Adds `∂/∂star Σ g_out · model(star)` into `grad`.
    fn backward(&self, g_out: &[f64], grad: &mut [f64]) {
        let mut g = self.sample.backward_values(g_out);
        g.iter_mut().zip(&self.blaze_over_scale).for_each(|(g, b)| *g *= b);
        let mut g = match &self.kernel {
            Some(k) => convolve_same_transpose(&g, k),
            None => g,
        };
        g.iter_mut().zip(&self.nostar).for_each(|(g, n)| *g *= n);
        for (acc, v) in grad.iter_mut().zip(self.shift.backward_values(&g)) {
            *acc += v;
        }
    }
}

/// Stellar velocity of spectrum `s` in the joint model: the fitted one, except
/// on a bootstrap pass where the star took no part in the fits.
fn joint_fit_vel(input: &AugmentInput, s: usize) -> f64 {
    input
        .model
        .star_vel_index()
        .filter(|_| input.star_enabled && !input.bootstrap)
        .map(|i| input.params[s].value(i))
        .unwrap_or(-input.observations[s].bc_vel)
}

fn freeze(input: &AugmentInput, s: usize) -> Frozen {
    let model = input.model;
    let obs = &input.observations[s];
    let params = &input.params[s];
    let grid = &model.grid.wave;

    let parts = model.parts(params, input.templates, obs);
    let scale = model.scale_at(params, input.templates, obs, true);

    let factor = crate::math::doppler_factor(joint_fit_vel(input, s));
    let shifted_nodes: Vec<f64> = grid.iter().map(|w| w * factor).collect();
    let (g_lo, g_hi) = (grid[0], grid[grid.len() - 1]);

    let weights = obs
        .flux
        .iter()
        .zip(&obs.mask)
        .zip(&parts.wave_data)
        .map(|((d, m), w)| {
            if d.is_finite() && *m > 0.5 && w.is_finite() && *w >= g_lo && *w <= g_hi {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    Frozen {
        shift: LinearInterp::new(&shifted_nodes, grid),
        sample: LinearInterp::new(grid, &parts.wave_data),
        blaze_over_scale: parts.blaze_hr.iter().map(|b| b / scale).collect(),
        nostar: parts.nostar_hr,
        additive: parts.additive_hr,
        kernel: parts.kernel,
        data: obs.flux.iter().map(|d| if d.is_finite() { *d } else { 0.0 }).collect(),
        weights,
    }
}

pub fn augment(input: &AugmentInput) -> Result<Vec<f64>, AppError> {
    let selected = select_spectra(input.nights, input.fit_rms, input.n_obs_nights)?;
    let frozen: Vec<Frozen> = selected
        .iter()
        .filter(|&&s| input.fit_rms[s].is_finite())
        .map(|&s| freeze(input, s))
        .collect();
    let total_w: f64 = frozen.iter().flat_map(|f| f.weights.iter()).sum();
    if !(total_w > 0.0) {
        return Err(AppError::data("No usable pixels for the joint template fit."));
    }

    let mut star = input.templates.star.clone();
    let mut adam = Adam::new(star.len(), input.settings.global_learning_rate);
    let mut grad = vec![0.0; star.len()];
    let mut diffs: Vec<Vec<f64>> = Vec::with_capacity(frozen.len());

    for epoch in 0..input.settings.global_epochs {
        diffs.clear();
        let mut sse = 0.0;
        for f in &frozen {
            let m = f.model(&star);
            let mut d = Vec::with_capacity(m.len());
            for ((m, y), w) in m.iter().zip(&f.data).zip(&f.weights) {
                if *w > 0.0 && m.is_finite() {
                    let r = m - y;
                    sse += w * r * r;
                    d.push(w * r);
                } else {
                    d.push(0.0);
                }
            }
            diffs.push(d);
        }
        let loss = (sse / total_w).sqrt();
        if !loss.is_finite() {
            return Err(AppError::numerical(format!("Joint template fit diverged at epoch {epoch}.")));
        }
        if (epoch + 1) % LOG_EVERY == 0 {
            log::debug!("Joint template fit: epoch {}, loss {loss:.6e}", epoch + 1);
        }
        if loss == 0.0 {
            break;
        }

        grad.iter_mut().for_each(|g| *g = 0.0);
        let norm = 1.0 / (total_w * loss);
        for (f, d) in frozen.iter().zip(&diffs) {
            let g_out: Vec<f64> = d.iter().map(|v| v * norm).collect();
            f.backward(&g_out, &mut grad);
        }
        adam.step(&mut star, &grad);
    }

    let delta: Vec<f64> = star.iter().zip(&input.templates.star).map(|(n, o)| n - o).collect();
    Ok(apply_update(&input.templates.star, &delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::tests::{Fixture, fixture, input, interior_error};
    use crate::domain::{AugmenterSettings, NightsForTemplate};

    #[test]
    fn adam_minimises_a_quadratic() {
        let mut x = vec![3.0, -2.0];
        let mut adam = Adam::new(2, 0.05);
        for _ in 0..2000 {
            let g: Vec<f64> = x.iter().map(|v| 2.0 * (v - 1.0)).collect();
            adam.step(&mut x, &g);
        }
        assert!((x[0] - 1.0).abs() < 5e-2 && (x[1] - 1.0).abs() < 5e-2, "{x:?}");
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let f = fixture(1);
        let settings = AugmenterSettings::default();
        let nights = NightsForTemplate::All;
        let inp = input(&f, &settings, &nights, &[1]);
        let fr = freeze(&inp, 0);
        let star = f.truth.iter().map(|v| 0.5 + 0.5 * v).collect::<Vec<f64>>();

        // Objective: Σ w (m − d)² / 2.
        let objective = |s: &[f64]| -> f64 {
            fr.model(s)
                .iter()
                .zip(&fr.data)
                .zip(&fr.weights)
                .map(|((m, d), w)| 0.5 * w * (m - d) * (m - d))
                .sum()
        };
        let m = fr.model(&star);
        let g_out: Vec<f64> = m.iter().zip(&fr.data).zip(&fr.weights).map(|((m, d), w)| w * (m - d)).collect();
        let mut grad = vec![0.0; star.len()];
        fr.backward(&g_out, &mut grad);

        let k = f.model.grid.wave.iter().position(|w| *w > 5002.2).unwrap();
        let h = 1e-6;
        let mut up = star.clone();
        up[k] += h;
        let mut down = star.clone();
        down[k] -= h;
        let numeric = (objective(&up) - objective(&down)) / (2.0 * h);
        assert!((numeric - grad[k]).abs() < 1e-6 * (1.0 + numeric.abs()), "{numeric} vs {}", grad[k]);
    }

    #[test]
    fn joint_fit_moves_towards_the_truth() {
        let f = fixture(3);
        let settings = AugmenterSettings {
            global_epochs: 300,
            global_learning_rate: 0.01,
            ..AugmenterSettings::default()
        };
        let nights = NightsForTemplate::All;
        let inp = input(&f, &settings, &nights, &[1, 1, 1]);
        let t = augment(&inp).unwrap();
        assert!(interior_error(&f, &t) < 0.5 * interior_error(&f, &f.templates.star));
        assert!(t.iter().all(|v| *v <= 1.0));
    }

    /// Gives spectra 1 and 2 stellar RVs of ±1.5 km/s on top of `-bc_vel`, with
    /// the parameters at the true velocities.
    fn moving_star_fixture() -> Fixture {
        let mut f = fixture(3);
        let mut truth_set = f.templates.clone();
        truth_set.star = f.truth.clone();
        for (s, offset) in [(1, 1500.0), (2, -1500.0)] {
            let vel = -f.observations[s].bc_vel + offset;
            f.params[s].set_value(0, vel);
            let (_, data) = f.model.build(&f.params[s], &truth_set, &f.observations[s], true);
            let (_, m) = f.model.build(&f.params[s], &f.templates, &f.observations[s], true);
            f.residuals[s] = data.iter().zip(&m).map(|(d, m)| d - m).collect();
            f.observations[s].flux = data;
        }
        f
    }

    #[test]
    fn joint_fit_uses_fitted_velocities_after_the_bootstrap() {
        let f = moving_star_fixture();
        let settings = AugmenterSettings {
            global_epochs: 300,
            global_learning_rate: 0.01,
            ..AugmenterSettings::default()
        };
        let nights = NightsForTemplate::All;
        let refine = input(&f, &settings, &nights, &[1, 1, 1]);
        assert_eq!(joint_fit_vel(&refine, 1), f.params[1].value(0));
        assert_eq!(joint_fit_vel(&refine, 2), f.params[2].value(0));

        let bootstrap = AugmentInput { bootstrap: true, ..refine };
        assert_eq!(joint_fit_vel(&bootstrap, 1), -f.observations[1].bc_vel);

        let start = interior_error(&f, &f.templates.star);
        let fitted = interior_error(&f, &augment(&refine).unwrap());
        let barycentric = interior_error(&f, &augment(&bootstrap).unwrap());
        assert!(fitted < 0.25 * start, "{fitted} vs {start}");
        assert!(fitted < 0.25 * barycentric, "{fitted} vs {barycentric}");
    }
}
