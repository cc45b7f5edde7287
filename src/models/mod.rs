//! Forward-model components and their composition.
//!
//! Components are small types with a `[lower, start, upper]` blueprint each; the
//! registry turns blueprints into components, and `SpectralModel` composes them
//! into one multiplicative model per order.

pub mod blaze;
pub mod components;
pub mod fringing;
pub mod gas_cell;
pub mod lsf;
pub mod parameters;
pub mod registry;
pub mod residual_lab;
pub mod spectral;
pub mod star;
pub mod tellurics;
pub mod wavelength;

pub use components::*;
pub use parameters::*;
pub use registry::*;
pub use spectral::*;
