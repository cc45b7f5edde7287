//! Numerical building blocks: interpolation, splines, statistics, convolution,
//! Hermite functions, and weighted least squares.

pub mod basis;
pub mod convolve;
pub mod interp;
pub mod ols;
pub mod spline;
pub mod stats;

pub use basis::*;
pub use convolve::*;
pub use interp::*;
pub use ols::*;
pub use spline::*;
pub use stats::*;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Doppler factor used throughout: `λ_obs = λ_rest · exp(v / c)`.
pub fn doppler_factor(velocity: f64) -> f64 {
    (velocity / SPEED_OF_LIGHT).exp()
}
