//! Per-spectrum fitting.
//!
//! Responsibilities:
//!
//! - minimise the RMS fit metric over the varying parameters (bounded Nelder–Mead)
//! - cross-correlate the model against data for velocity priors, independent
//!   per-iteration velocities and bisector spans

pub mod nelder_mead;
pub mod target;
pub mod xcorr;

pub use nelder_mead::*;
pub use target::*;
pub use xcorr::*;
