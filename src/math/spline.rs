//! Weighted least-squares cubic B-splines.
//!
//! We solve
//!
//! ```text
//! minimize Σ w_i (y_i − s(x_i))²,   s(x) = Σ_j c_j B_j(x)
//! ```
//!
//! for a clamped cubic B-spline with caller-supplied interior knots. Each sample
//! touches only four basis functions, so the normal equations `(BᵀWB) c = BᵀWy`
//! are banded (half-bandwidth 3) and are factorised with a banded Cholesky in
//! `O(n_coeffs)` memory. Template-sized problems have thousands of knots, which
//! rules out a dense solve.

use crate::error::AppError;

const DEGREE: usize = 3;

/// A clamped cubic B-spline on `[lo, hi]`.
#[derive(Debug, Clone)]
pub struct BSpline {
    knots: Vec<f64>,
    coeffs: Vec<f64>,
}

impl BSpline {
    /// Fit a cubic spline to weighted samples.
    ///
    /// `x` need not be sorted. Samples with non-finite values or non-positive
    /// weights are ignored. Interior knots must lie strictly inside `(lo, hi)`
    /// and be increasing.
    pub fn fit_lsq(
        x: &[f64],
        y: &[f64],
        w: &[f64],
        interior_knots: &[f64],
        lo: f64,
        hi: f64,
    ) -> Result<Self, AppError> {
        if !(lo < hi) {
            return Err(AppError::numerical(format!("Invalid spline interval [{lo}, {hi}].")));
        }
        if interior_knots.windows(2).any(|k| !(k[1] > k[0]))
            || interior_knots.iter().any(|k| !(*k > lo && *k < hi))
        {
            return Err(AppError::numerical("Spline interior knots must be increasing and inside the interval."));
        }

        let mut knots = Vec::with_capacity(interior_knots.len() + 2 * (DEGREE + 1));
        knots.extend(std::iter::repeat_n(lo, DEGREE + 1));
        knots.extend_from_slice(interior_knots);
        knots.extend(std::iter::repeat_n(hi, DEGREE + 1));
        let n_coeffs = knots.len() - DEGREE - 1;

        // band[i][d] = A(i, i + d)
        let mut band = vec![[0.0f64; DEGREE + 1]; n_coeffs];
        let mut rhs = vec![0.0; n_coeffs];
        let mut n_used = 0usize;

        for ((&xi, &yi), &wi) in x.iter().zip(y).zip(w) {
            if !(xi.is_finite() && yi.is_finite() && wi.is_finite() && wi > 0.0) || xi < lo || xi > hi {
                continue;
            }
            let span = find_span(&knots, n_coeffs, xi);
            let basis = basis_funs(&knots, span, xi);
            let first = span - DEGREE;
            for a in 0..=DEGREE {
                rhs[first + a] += wi * basis[a] * yi;
                for b in a..=DEGREE {
                    band[first + a][b - a] += wi * basis[a] * basis[b];
                }
            }
            n_used += 1;
        }
        if n_used == 0 {
            return Err(AppError::numerical("No usable samples for spline fit."));
        }

        // Light ridge so coefficients without data support stay at zero instead
        // of making the system singular.
        let max_diag = band.iter().map(|r| r[0]).fold(0.0f64, f64::max);
        let ridge = 1e-10 * max_diag.max(f64::MIN_POSITIVE);
        for row in band.iter_mut() {
            row[0] += ridge;
        }

        let coeffs = solve_banded_spd(&band, &rhs)?;
        Ok(Self { knots, coeffs })
    }

    pub fn interval(&self) -> (f64, f64) {
        (self.knots[DEGREE], self.knots[self.knots.len() - DEGREE - 1])
    }

    /// Evaluate the spline; NaN outside its interval.
    pub fn eval(&self, x: f64) -> f64 {
        let (lo, hi) = self.interval();
        if !x.is_finite() || x < lo || x > hi {
            return f64::NAN;
        }
        let span = find_span(&self.knots, self.coeffs.len(), x);
        let basis = basis_funs(&self.knots, span, x);
        let first = span - DEGREE;
        basis.iter().enumerate().map(|(a, b)| b * self.coeffs[first + a]).sum()
    }
}

/// Keep only knots whose following interval `[k_i, k_{i+1})` holds at least one
/// sample (`x_sorted` ascending). The last knot's interval is open-ended.
pub fn prune_empty_knots(x_sorted: &[f64], knots: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(knots.len());
    for (i, &k) in knots.iter().enumerate() {
        let next = knots.get(i + 1).copied().unwrap_or(f64::INFINITY);
        let start = x_sorted.partition_point(|&v| v < k);
        if start < x_sorted.len() && x_sorted[start] < next {
            out.push(k);
        }
    }
    out
}

fn find_span(knots: &[f64], n_coeffs: usize, x: f64) -> usize {
    if x >= knots[n_coeffs] {
        return n_coeffs - 1;
    }
    let k = knots.partition_point(|&t| t <= x);
    (k - 1).clamp(DEGREE, n_coeffs - 1)
}

/// The `DEGREE + 1` non-zero basis functions at `x` (de Boor / Cox recursion).
fn basis_funs(knots: &[f64], span: usize, x: f64) -> [f64; DEGREE + 1] {
    let mut n = [0.0; DEGREE + 1];
    let mut left = [0.0; DEGREE + 1];
    let mut right = [0.0; DEGREE + 1];
    n[0] = 1.0;
    for j in 1..=DEGREE {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom != 0.0 { n[r] / denom } else { 0.0 };
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}

/// Solve `A c = b` for symmetric positive-definite banded `A` stored as upper bands.
fn solve_banded_spd(band: &[[f64; DEGREE + 1]], rhs: &[f64]) -> Result<Vec<f64>, AppError> {
    let m = band.len();
    // l[i][d] = L(i, i - d)
    let mut l = vec![[0.0f64; DEGREE + 1]; m];
    for i in 0..m {
        let j0 = i.saturating_sub(DEGREE);
        for j in j0..=i {
            let mut sum = band[j][i - j];
            for k in j0..j {
                if j - k > DEGREE {
                    continue;
                }
                sum -= l[i][i - k] * l[j][j - k];
            }
            if i == j {
                if !(sum > 0.0) {
                    return Err(AppError::numerical("Spline normal equations are not positive definite."));
                }
                l[i][0] = sum.sqrt();
            } else {
                l[i][i - j] = sum / l[j][0];
            }
        }
    }

    let mut z = vec![0.0; m];
    for i in 0..m {
        let mut s = rhs[i];
        for k in i.saturating_sub(DEGREE)..i {
            s -= l[i][i - k] * z[k];
        }
        z[i] = s / l[i][0];
    }
    let mut c = vec![0.0; m];
    for i in (0..m).rev() {
        let mut s = z[i];
        for k in i + 1..(i + DEGREE + 1).min(m) {
            s -= l[k][k - i] * c[k];
        }
        c[i] = s / l[i][0];
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::stats::linspace;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reproduces_a_cubic_polynomial_exactly() {
        let x = linspace(0.0, 10.0, 200);
        let f = |t: f64| 0.5 - 0.2 * t + 0.03 * t * t - 0.001 * t * t * t;
        let y: Vec<f64> = x.iter().map(|&t| f(t)).collect();
        let w = vec![1.0; x.len()];
        let knots = linspace(1.0, 9.0, 9);
        let s = BSpline::fit_lsq(&x, &y, &w, &knots, 0.0, 10.0).unwrap();
        for t in [0.0, 0.3, 4.4, 7.77, 10.0] {
            assert_abs_diff_eq!(s.eval(t), f(t), epsilon = 1e-7);
        }
        assert!(s.eval(10.5).is_nan());
    }

    #[test]
    fn weights_pull_fit_toward_heavy_samples() {
        let x = vec![0.0, 0.0, 0.7, 0.7, 1.3, 1.3, 2.0, 2.0];
        let y = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let w = vec![1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0];
        let s = BSpline::fit_lsq(&x, &y, &w, &[], 0.0, 2.0).unwrap();
        assert_abs_diff_eq!(s.eval(1.0), 0.9, epsilon = 1e-6);
    }

    #[test]
    fn pruning_removes_knots_over_gaps() {
        let x = [0.1, 0.2, 0.3, 2.5, 2.6];
        let knots = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(prune_empty_knots(&x, &knots), vec![0.0, 2.0]);
    }
}
