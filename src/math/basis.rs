//! Hermite function basis for line-spread-function kernels.
//!
//! The normalised Hermite functions are
//!
//! - `ψ_0(x) = π^{-1/4} exp(-x²/2)`
//! - `ψ_1(x) = √2 · x · ψ_0(x)`
//! - `ψ_{k+1}(x) = √(2/(k+1)) · x · ψ_k(x) − √(k/(k+1)) · ψ_{k−1}(x)`
//!
//! Numerical notes:
//! - We use the three-term recurrence on the normalised functions rather than
//!   evaluating physicists' polynomials `H_k` directly; `H_k` grows like `2^k k!`
//!   and overflows long before the Gaussian factor brings it back down.
//! - Far in the wings `exp(-x²/2)` underflows to zero, which is the correct limit.

/// Evaluate `ψ_0..=ψ_deg` at `x`. Returns `deg + 1` values.
pub fn hermite_functions(x: f64, deg: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(deg + 1);
    let psi0 = std::f64::consts::PI.powf(-0.25) * (-0.5 * x * x).exp();
    out.push(psi0);
    if deg == 0 {
        return out;
    }
    out.push(std::f64::consts::SQRT_2 * x * psi0);
    for k in 1..deg {
        let kf = k as f64;
        let next = (2.0 / (kf + 1.0)).sqrt() * x * out[k] - (kf / (kf + 1.0)).sqrt() * out[k - 1];
        out.push(next);
    }
    out
}
