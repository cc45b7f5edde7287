//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observations, templates, barycentric corrections and fit results (`types`)
//! - the run configuration and its enums (`config`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
