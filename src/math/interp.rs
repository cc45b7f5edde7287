//! One-dimensional interpolation on monotonically increasing grids.
//!
//! Three families live here:
//!
//! - plain linear resampling (`interp_nan`, `interp_clamped`), used everywhere a
//!   spectrum is moved between grids
//! - cubic Hermite interpolants (`CubicHermite`) built with PCHIP, Akima, or
//!   natural-spline slopes
//! - `LinearInterp`, a precomputed linear resampling operator that can push
//!   gradients back to both the sampled values and the query positions

/// Index `i` such that `xp[i] <= x < xp[i + 1]`, clamped to the valid interval range.
fn bracket(xp: &[f64], x: f64) -> usize {
    let n = xp.len();
    let k = xp.partition_point(|&v| v <= x);
    k.saturating_sub(1).min(n.saturating_sub(2))
}

/// Linear interpolation of `(xp, fp)` at `x`; NaN outside `[xp[0], xp[n-1]]`.
pub fn interp_nan(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    x.iter().map(|&xi| interp_one(xi, xp, fp, f64::NAN, f64::NAN)).collect()
}

/// Linear interpolation of `(xp, fp)` at `x`, holding edge values outside the grid.
pub fn interp_clamped(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    let (left, right) = match (fp.first(), fp.last()) {
        (Some(&l), Some(&r)) => (l, r),
        _ => (f64::NAN, f64::NAN),
    };
    x.iter().map(|&xi| interp_one(xi, xp, fp, left, right)).collect()
}

/// Linear interpolation with an explicit fill value outside the grid.
pub fn interp_fill(x: &[f64], xp: &[f64], fp: &[f64], fill: f64) -> Vec<f64> {
    x.iter().map(|&xi| interp_one(xi, xp, fp, fill, fill)).collect()
}

fn interp_one(x: f64, xp: &[f64], fp: &[f64], left: f64, right: f64) -> f64 {
    let n = xp.len();
    if n == 0 || !x.is_finite() {
        return f64::NAN;
    }
    if n == 1 {
        return if x == xp[0] { fp[0] } else { f64::NAN };
    }
    if x < xp[0] {
        return left;
    }
    if x > xp[n - 1] {
        return right;
    }
    let i = bracket(xp, x);
    let h = xp[i + 1] - xp[i];
    if h <= 0.0 {
        return fp[i];
    }
    let t = (x - xp[i]) / h;
    fp[i] * (1.0 - t) + fp[i + 1] * t
}

/// How the high-resolution model is resampled onto the data grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleKind {
    #[default]
    Linear,
    Akima,
}

/// Resample `(xp, fp)` onto `x`. Samples outside the grid are NaN for both kinds.
pub fn resample(kind: ResampleKind, x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    match kind {
        ResampleKind::Linear => interp_nan(x, xp, fp),
        ResampleKind::Akima => match CubicHermite::akima(xp, fp) {
            Some(spline) => spline.eval_many(x),
            None => interp_nan(x, xp, fp),
        },
    }
}

/// Piecewise cubic Hermite interpolant.
///
/// Evaluation outside the knot range returns NaN (no extrapolation).
#[derive(Debug, Clone)]
pub struct CubicHermite {
    x: Vec<f64>,
    y: Vec<f64>,
    d: Vec<f64>,
}

impl CubicHermite {
    /// Shape-preserving (monotone) PCHIP slopes (Fritsch–Carlson with the
    /// three-point end condition).
    pub fn pchip(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = validate_knots(x, y)?;
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let m: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();
        let mut d = vec![0.0; n];

        if n == 2 {
            d[0] = m[0];
            d[1] = m[0];
            return Some(Self { x: x.to_vec(), y: y.to_vec(), d });
        }

        for k in 1..n - 1 {
            let (m0, m1) = (m[k - 1], m[k]);
            if m0 == 0.0 || m1 == 0.0 || m0.signum() != m1.signum() {
                d[k] = 0.0;
            } else {
                let w1 = 2.0 * h[k] + h[k - 1];
                let w2 = h[k] + 2.0 * h[k - 1];
                d[k] = (w1 + w2) / (w1 / m0 + w2 / m1);
            }
        }
        d[0] = pchip_end_slope(h[0], h[1], m[0], m[1]);
        d[n - 1] = pchip_end_slope(h[n - 2], h[n - 3], m[n - 2], m[n - 3]);

        Some(Self { x: x.to_vec(), y: y.to_vec(), d })
    }

    /// Akima slopes, robust to isolated outliers in `y`.
    pub fn akima(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = validate_knots(x, y)?;
        let mut m = Vec::with_capacity(n + 3);
        m.push(0.0);
        m.push(0.0);
        for i in 0..n - 1 {
            m.push((y[i + 1] - y[i]) / (x[i + 1] - x[i]));
        }
        if n == 2 {
            let d = vec![m[2], m[2]];
            return Some(Self { x: x.to_vec(), y: y.to_vec(), d });
        }
        // Two ghost slopes on each side.
        m[1] = 2.0 * m[2] - m[3];
        m[0] = 3.0 * m[2] - 2.0 * m[3];
        let last = m.len() - 1;
        let right1 = 2.0 * m[last] - m[last - 1];
        let right2 = 3.0 * m[last] - 2.0 * m[last - 1];
        m.push(right1);
        m.push(right2);

        let d = (0..n)
            .map(|i| {
                // slopes m[i], m[i+1] | m[i+2], m[i+3] around knot i
                let w1 = (m[i + 3] - m[i + 2]).abs();
                let w2 = (m[i + 1] - m[i]).abs();
                if w1 + w2 > 1e-12 * (m[i + 1].abs() + m[i + 2].abs()).max(f64::MIN_POSITIVE) {
                    (w1 * m[i + 1] + w2 * m[i + 2]) / (w1 + w2)
                } else {
                    0.5 * (m[i + 1] + m[i + 2])
                }
            })
            .collect();

        Some(Self { x: x.to_vec(), y: y.to_vec(), d })
    }

    /// Natural cubic spline (zero second derivative at both ends).
    pub fn natural(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = validate_knots(x, y)?;
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut second = vec![0.0; n];

        if n > 2 {
            // Tridiagonal solve (Thomas algorithm) for interior second derivatives.
            let k = n - 2;
            let mut diag = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            let mut upper = vec![0.0; k];
            for i in 0..k {
                diag[i] = 2.0 * (h[i] + h[i + 1]);
                upper[i] = h[i + 1];
                rhs[i] = 6.0 * ((y[i + 2] - y[i + 1]) / h[i + 1] - (y[i + 1] - y[i]) / h[i]);
            }
            for i in 1..k {
                let w = h[i] / diag[i - 1];
                diag[i] -= w * upper[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            second[k] = rhs[k - 1] / diag[k - 1];
            for i in (0..k - 1).rev() {
                second[i + 1] = (rhs[i] - upper[i] * second[i + 2]) / diag[i];
            }
        }

        let mut d = vec![0.0; n];
        for i in 0..n - 1 {
            d[i] = (y[i + 1] - y[i]) / h[i] - h[i] * (2.0 * second[i] + second[i + 1]) / 6.0;
        }
        d[n - 1] = (y[n - 1] - y[n - 2]) / h[n - 2] + h[n - 2] * (second[n - 2] + 2.0 * second[n - 1]) / 6.0;

        Some(Self { x: x.to_vec(), y: y.to_vec(), d })
    }

    pub fn eval(&self, xq: f64) -> f64 {
        let n = self.x.len();
        if !xq.is_finite() || xq < self.x[0] || xq > self.x[n - 1] {
            return f64::NAN;
        }
        let i = bracket(&self.x, xq);
        let h = self.x[i + 1] - self.x[i];
        let t = (xq - self.x[i]) / h;
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * self.y[i] + h10 * h * self.d[i] + h01 * self.y[i + 1] + h11 * h * self.d[i + 1]
    }

    pub fn eval_many(&self, xq: &[f64]) -> Vec<f64> {
        xq.iter().map(|&v| self.eval(v)).collect()
    }
}

fn validate_knots(x: &[f64], y: &[f64]) -> Option<usize> {
    let n = x.len();
    if n < 2 || y.len() != n {
        return None;
    }
    if x.windows(2).any(|w| !(w[1] > w[0])) || y.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(n)
}

fn pchip_end_slope(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
    if d.signum() != m0.signum() {
        0.0
    } else if m0.signum() != m1.signum() && d.abs() > 3.0 * m0.abs() {
        3.0 * m0
    } else {
        d
    }
}

/// Precomputed linear resampling from a node grid onto fixed query points.
///
/// `forward(values)` samples the piecewise-linear function through
/// `(nodes, values)` at each query. Queries outside the node range hold the edge
/// value. The operator is linear in `values`, so `backward_values` is its exact
/// transpose; `grad_queries` returns the local slope for each query (zero where
/// a query is clamped to an edge).
#[derive(Debug, Clone)]
pub struct LinearInterp {
    lower: Vec<usize>,
    frac: Vec<f64>,
    inv_h: Vec<f64>,
    clamped: Vec<bool>,
    n_nodes: usize,
}

impl LinearInterp {
    pub fn new(nodes: &[f64], queries: &[f64]) -> Self {
        let n = nodes.len();
        let mut lower = Vec::with_capacity(queries.len());
        let mut frac = Vec::with_capacity(queries.len());
        let mut inv_h = Vec::with_capacity(queries.len());
        let mut clamped = Vec::with_capacity(queries.len());

        for &q in queries {
            if n < 2 {
                lower.push(0);
                frac.push(0.0);
                inv_h.push(0.0);
                clamped.push(true);
                continue;
            }
            let i = bracket(nodes, q);
            let h = nodes[i + 1] - nodes[i];
            let raw = if h > 0.0 { (q - nodes[i]) / h } else { 0.0 };
            let t = raw.clamp(0.0, 1.0);
            lower.push(i);
            frac.push(t);
            inv_h.push(if h > 0.0 { 1.0 / h } else { 0.0 });
            clamped.push(!(q >= nodes[0] && q <= nodes[n - 1]));
        }

        Self {
            lower,
            frac,
            inv_h,
            clamped,
            n_nodes: n,
        }
    }

    pub fn n_queries(&self) -> usize {
        self.lower.len()
    }

    pub fn forward(&self, values: &[f64]) -> Vec<f64> {
        if self.n_nodes < 2 {
            let v = values.first().copied().unwrap_or(f64::NAN);
            return vec![v; self.lower.len()];
        }
        self.lower
            .iter()
            .zip(&self.frac)
            .map(|(&i, &t)| values[i] * (1.0 - t) + values[i + 1] * t)
            .collect()
    }

    /// Gradient of `Σ grad_out[k] * forward(values)[k]` with respect to `values`.
    pub fn backward_values(&self, grad_out: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; self.n_nodes];
        if self.n_nodes < 2 {
            if let Some(g0) = grad.first_mut() {
                *g0 = grad_out.iter().sum();
            }
            return grad;
        }
        for ((&i, &t), &g) in self.lower.iter().zip(&self.frac).zip(grad_out) {
            grad[i] += g * (1.0 - t);
            grad[i + 1] += g * t;
        }
        grad
    }

    /// Gradient of `Σ grad_out[k] * forward(values)[k]` with respect to each query position.
    pub fn grad_queries(&self, values: &[f64], grad_out: &[f64]) -> Vec<f64> {
        if self.n_nodes < 2 {
            return vec![0.0; self.lower.len()];
        }
        self.lower
            .iter()
            .zip(&self.inv_h)
            .zip(&self.clamped)
            .zip(grad_out)
            .map(|(((&i, &ih), &c), &g)| if c { 0.0 } else { g * (values[i + 1] - values[i]) * ih })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linear_interp_marks_out_of_range_as_nan() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 20.0];
        let out = interp_nan(&[-0.5, 0.5, 1.5, 2.0, 2.5], &xp, &fp);
        assert!(out[0].is_nan());
        assert_abs_diff_eq!(out[1], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[2], 15.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[3], 20.0, epsilon = 1e-12);
        assert!(out[4].is_nan());

        let held = interp_clamped(&[-1.0, 3.0], &xp, &fp);
        assert_eq!(held, vec![0.0, 20.0]);
    }

    #[test]
    fn pchip_preserves_monotonicity() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [0.0, 0.0, 1.0, 1.0, 1.0];
        let s = CubicHermite::pchip(&x, &y).unwrap();
        let mut prev = s.eval(0.0);
        for k in 1..=400 {
            let v = s.eval(k as f64 * 0.01);
            assert!(v >= prev - 1e-12);
            assert!((0.0..=1.0).contains(&v));
            prev = v;
        }
        assert!(s.eval(4.5).is_nan());
    }

    #[test]
    fn natural_spline_reproduces_linear_data_and_knots() {
        let x = [0.0, 1.0, 3.0, 4.0];
        let y = [1.0, 3.0, 7.0, 9.0];
        let s = CubicHermite::natural(&x, &y).unwrap();
        assert_abs_diff_eq!(s.eval(2.0), 5.0, epsilon = 1e-12);

        let yc = [0.0, 1.0, -1.0, 0.5];
        let c = CubicHermite::natural(&x, &yc).unwrap();
        for (xi, yi) in x.iter().zip(yc.iter()) {
            assert_abs_diff_eq!(c.eval(*xi), *yi, epsilon = 1e-12);
        }
    }

    #[test]
    fn akima_passes_through_knots() {
        let x: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| (v * 0.7).sin()).collect();
        let s = CubicHermite::akima(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert_abs_diff_eq!(s.eval(*xi), *yi, epsilon = 1e-12);
        }
        let r = resample(ResampleKind::Akima, &[3.5, 9.0], &x, &y);
        assert!((r[0] - (3.5f64 * 0.7).sin()).abs() < 0.02);
        assert!(r[1].is_nan());
    }

    #[test]
    fn linear_operator_gradients_match_finite_differences() {
        let nodes = [0.0, 0.5, 1.5, 2.0, 3.0];
        let values = [1.0, 0.2, 0.7, 0.9, 0.4];
        let queries = [0.1, 0.75, 1.9, 2.6];
        let weights = [0.3, -1.2, 0.8, 2.0];
        let op = LinearInterp::new(&nodes, &queries);

        let objective = |v: &[f64], q: &[f64]| -> f64 {
            let o = LinearInterp::new(&nodes, q).forward(v);
            o.iter().zip(weights.iter()).map(|(a, b)| a * b).sum()
        };

        let gv = op.backward_values(&weights);
        let eps = 1e-7;
        for j in 0..values.len() {
            let mut vp = values.to_vec();
            vp[j] += eps;
            let fd = (objective(&vp, &queries) - objective(&values, &queries)) / eps;
            assert_abs_diff_eq!(gv[j], fd, epsilon = 1e-6);
        }

        let gq = op.grad_queries(&values, &weights);
        for k in 0..queries.len() {
            let mut qp = queries.to_vec();
            qp[k] += eps;
            let fd = (objective(&values, &qp) - objective(&values, &queries)) / eps;
            assert_abs_diff_eq!(gq[k], fd, epsilon = 1e-5);
        }
    }
}
