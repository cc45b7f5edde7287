//! `rv-forward` library crate.
//!
//! Forward modeling of high-resolution echelle spectra for precise radial
//! velocities, with iterative refinement of the stellar template. The binary
//! (`rvfm`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning processes
//! - orders can be fitted from other drivers (notebooks, batch schedulers)

pub mod app;
pub mod augment;
pub mod cli;
pub mod collection;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod rvs;
