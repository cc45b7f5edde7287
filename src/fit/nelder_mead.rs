//! Bounded downhill-simplex minimisation over a `ParameterSet`.
//!
//! The simplex lives in the space of the *varying* parameters only; fixed
//! parameters ride along unchanged. Trial points outside the bounds are clamped
//! before evaluation rather than rejected, so every evaluated point is feasible.
//!
//! Convergence is two-level:
//!
//! - an inner simplex run stops when the spread of function values (or of the
//!   vertices) falls below tolerance
//! - an outer loop restarts the simplex around the incumbent and stops after
//!   `no_improve_break` consecutive restarts that did not improve it by more
//!   than `ftol` (relative) + `atol` (absolute)
//!
//! Restarts matter in practice: a single simplex run on a forward model tends to
//! collapse along a degenerate direction (blaze vs. LSF normalisation, for
//! example) long before the true minimum.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ParameterSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NelderMeadOptions {
    /// Relative function tolerance.
    pub ftol: f64,
    /// Absolute function tolerance floor.
    pub atol: f64,
    /// Vertex spread tolerance, relative to each coordinate's magnitude.
    pub xtol: f64,
    /// Consecutive non-improving restarts before stopping.
    pub no_improve_break: usize,
    /// Hard cap on target evaluations; defaults to `5000 × n_varying`.
    pub max_f_evals: Option<usize>,
    /// Initial simplex edge as a fraction of each parameter's bound span.
    pub initial_step: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-5,
            atol: 1e-14,
            xtol: 1e-10,
            no_improve_break: 3,
            max_f_evals: None,
            initial_step: 0.25,
        }
    }
}

/// Outcome of one minimisation.
#[derive(Debug, Clone)]
pub struct OptResult {
    pub best: ParameterSet,
    pub fbest: f64,
    pub n_calls: usize,
}

// Standard coefficients.
const ALPHA: f64 = 1.0;
const GAMMA: f64 = 2.0;
const RHO: f64 = 0.5;
const SIGMA: f64 = 0.5;

struct Problem<F> {
    target: F,
    work: ParameterSet,
    lower: Vec<f64>,
    upper: Vec<f64>,
    n_calls: usize,
    max_calls: usize,
}

impl<F: FnMut(&ParameterSet) -> f64> Problem<F> {
    fn clamp(&self, x: &mut [f64]) {
        for ((v, lo), hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.max(*lo).min(*hi);
        }
    }

    fn eval(&mut self, x: &[f64]) -> f64 {
        self.work.set_varying_values(x);
        self.n_calls += 1;
        let f = (self.target)(&self.work);
        if f.is_finite() { f } else { f64::INFINITY }
    }

    fn exhausted(&self) -> bool {
        self.n_calls >= self.max_calls
    }
}

/// Minimise `target` starting from `init`.
///
/// Errors when the metric at the starting point is non-finite; the caller decides
/// whether that drops or flags the spectrum.
pub fn solve<F>(mut target: F, init: &ParameterSet, opts: &NelderMeadOptions) -> Result<OptResult, AppError>
where
    F: FnMut(&ParameterSet) -> f64,
{
    let f0 = target(init);
    if !f0.is_finite() {
        return Err(AppError::numerical(format!(
            "Target metric is non-finite ({f0}) at the starting parameters."
        )));
    }

    let idx = init.varying_indices();
    let n = idx.len();
    if n == 0 {
        return Ok(OptResult {
            best: init.clone(),
            fbest: f0,
            n_calls: 1,
        });
    }

    let mut problem = Problem {
        target,
        work: init.clone(),
        lower: idx.iter().map(|&i| init[i].lower_bound).collect(),
        upper: idx.iter().map(|&i| init[i].upper_bound).collect(),
        n_calls: 1,
        max_calls: opts.max_f_evals.unwrap_or(5000 * n).max(n + 2),
    };

    let mut xbest = init.varying_values();
    let mut fbest = f0;
    let mut no_improve = 0usize;
    let mut step_scale = 1.0;

    while no_improve < opts.no_improve_break && !problem.exhausted() {
        let (x, f) = run_simplex(&mut problem, &xbest, fbest, opts, step_scale);
        let improvement = fbest - f;
        if f < fbest {
            xbest = x;
            fbest = f;
        }
        if improvement > opts.ftol * fbest.abs() + opts.atol {
            no_improve = 0;
        } else {
            no_improve += 1;
            // Shrink the restart simplex so repeated restarts probe locally.
            step_scale *= 0.5;
        }
    }

    let mut best = init.clone();
    best.set_varying_values(&xbest);
    Ok(OptResult {
        best,
        fbest,
        n_calls: problem.n_calls,
    })
}

fn initial_simplex<F: FnMut(&ParameterSet) -> f64>(
    problem: &Problem<F>,
    x0: &[f64],
    opts: &NelderMeadOptions,
    scale: f64,
) -> Vec<Vec<f64>> {
    let n = x0.len();
    let mut simplex = vec![x0.to_vec()];
    for i in 0..n {
        let span = problem.upper[i] - problem.lower[i];
        let mut step = if span.is_finite() && span > 0.0 {
            opts.initial_step * span * scale
        } else if x0[i] != 0.0 {
            0.05 * x0[i].abs() * scale
        } else {
            2.5e-4 * scale
        };
        // Step inward when the start sits on the upper bound.
        if x0[i] + step > problem.upper[i] {
            step = -step;
        }
        let mut v = x0.to_vec();
        v[i] += step;
        problem.clamp(&mut v);
        simplex.push(v);
    }
    simplex
}

/// One simplex descent from `x0`. Returns the best vertex and its value.
fn run_simplex<F: FnMut(&ParameterSet) -> f64>(
    problem: &mut Problem<F>,
    x0: &[f64],
    f0: f64,
    opts: &NelderMeadOptions,
    scale: f64,
) -> (Vec<f64>, f64) {
    let n = x0.len();
    let mut simplex = initial_simplex(problem, x0, opts, scale);
    let mut fvals = Vec::with_capacity(n + 1);
    fvals.push(f0);
    for v in simplex.iter().skip(1) {
        fvals.push(problem.eval(v));
    }

    loop {
        // Sort vertices by value; the stable sort keeps earlier vertices first on ties.
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| fvals[a].total_cmp(&fvals[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        fvals = order.iter().map(|&i| fvals[i]).collect();

        if problem.exhausted() || converged(&simplex, &fvals, opts) {
            break;
        }

        let mut centroid = vec![0.0; n];
        for v in &simplex[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let towards = |coef: f64, worst: &[f64]| -> Vec<f64> {
            centroid
                .iter()
                .zip(worst)
                .map(|(c, w)| c + coef * (c - w))
                .collect()
        };

        let worst = simplex[n].clone();
        let mut xr = towards(ALPHA, &worst);
        problem.clamp(&mut xr);
        let fr = problem.eval(&xr);

        if fr < fvals[0] {
            let mut xe = towards(GAMMA, &worst);
            problem.clamp(&mut xe);
            let fe = problem.eval(&xe);
            if fe < fr {
                simplex[n] = xe;
                fvals[n] = fe;
            } else {
                simplex[n] = xr;
                fvals[n] = fr;
            }
            continue;
        }
        if fr < fvals[n - 1] {
            simplex[n] = xr;
            fvals[n] = fr;
            continue;
        }

        // Contraction: outside when the reflection beat the worst, inside otherwise.
        let (mut xc, accept_against) = if fr < fvals[n] {
            (towards(RHO, &worst), fr)
        } else {
            (towards(-RHO, &worst), fvals[n])
        };
        problem.clamp(&mut xc);
        let fc = problem.eval(&xc);
        if fc < accept_against {
            simplex[n] = xc;
            fvals[n] = fc;
            continue;
        }

        // Shrink towards the best vertex.
        let best = simplex[0].clone();
        for k in 1..=n {
            let mut v: Vec<f64> = best
                .iter()
                .zip(&simplex[k])
                .map(|(b, x)| b + SIGMA * (x - b))
                .collect();
            problem.clamp(&mut v);
            fvals[k] = problem.eval(&v);
            simplex[k] = v;
            if problem.exhausted() {
                break;
            }
        }
    }

    (simplex[0].clone(), fvals[0])
}

fn converged(simplex: &[Vec<f64>], fvals: &[f64], opts: &NelderMeadOptions) -> bool {
    let fbest = fvals[0];
    let fworst = fvals[fvals.len() - 1];
    if fworst.is_finite() && (fworst - fbest).abs() <= opts.ftol * fbest.abs() + opts.atol {
        return true;
    }
    let best = &simplex[0];
    simplex[1..].iter().all(|v| {
        v.iter()
            .zip(best)
            .all(|(x, b)| (x - b).abs() <= opts.xtol * b.abs().max(1.0))
    })
}
