//! Weighted least squares solver.
//!
//! Low-order polynomial fits show up in two places: the trial continuum fit at
//! ingestion and the polynomial blaze initial guess. Both solve
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` and the result is an ordinary least squares problem.
//! - SVD handles tall design matrices robustly. (Nalgebra's `QR::solve` is
//!   intended for square systems and panics for non-square matrices.)
//! - Abscissae are centred and scaled to `[-1, 1]` before building the
//!   Vandermonde matrix.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// A polynomial in a centred/scaled abscissa `u = (x - center) / scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    pub center: f64,
    pub scale: f64,
    /// Coefficients in increasing power of `u`.
    pub coeffs: Vec<f64>,
}

impl Polynomial {
    pub fn eval(&self, x: f64) -> f64 {
        let u = (x - self.center) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * u + c)
    }
}

/// Weighted polynomial fit of degree `deg`.
///
/// Points with non-finite `x`/`y` or non-positive weight are ignored. Returns
/// `None` when fewer than `deg + 1` points remain or the solve fails.
pub fn polyfit_weighted(x: &[f64], y: &[f64], w: &[f64], deg: usize) -> Option<Polynomial> {
    let rows: Vec<(f64, f64, f64)> = x
        .iter()
        .zip(y)
        .zip(w)
        .filter(|((xi, yi), wi)| xi.is_finite() && yi.is_finite() && wi.is_finite() && **wi > 0.0)
        .map(|((xi, yi), wi)| (*xi, *yi, *wi))
        .collect();
    if rows.len() < deg + 1 {
        return None;
    }

    let lo = rows.iter().map(|r| r.0).fold(f64::INFINITY, f64::min);
    let hi = rows.iter().map(|r| r.0).fold(f64::NEG_INFINITY, f64::max);
    let center = 0.5 * (lo + hi);
    let scale = (0.5 * (hi - lo)).max(f64::EPSILON);

    let p = deg + 1;
    let mut design = DMatrix::<f64>::zeros(rows.len(), p);
    let mut target = DVector::<f64>::zeros(rows.len());
    for (i, (xi, yi, wi)) in rows.iter().enumerate() {
        let sw = wi.sqrt();
        let u = (xi - center) / scale;
        let mut pow = 1.0;
        for j in 0..p {
            design[(i, j)] = sw * pow;
            pow *= u;
        }
        target[i] = sw * yi;
    }

    let beta = solve_least_squares(&design, &target)?;
    Some(Polynomial {
        center,
        scale,
        coeffs: beta.iter().copied().collect(),
    })
}
