//! Input/output helpers.
//!
//! - CSV ingest for spectra, templates and barycentric corrections (`ingest`)
//! - JSON read/write with NaN-tolerant deserializers (`json`)
//! - RV archive, template and combined-RV exports (`export`)

pub mod export;
pub mod ingest;
pub mod json;

pub use export::*;
pub use ingest::*;
pub use json::*;
