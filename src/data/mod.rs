//! Data preparation.
//!
//! - `sanity`: pixel masking at ingestion (crop, normalise, defects, trend outliers)
//! - `continuum`: trial log-continuum fit that vets each spectrum
//! - `synthetic`: seeded single-order datasets for demos and end-to-end tests

pub mod continuum;
pub mod sanity;
pub mod synthetic;

pub use continuum::*;
pub use sanity::*;
pub use synthetic::*;
