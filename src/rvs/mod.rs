//! Radial-velocity products: nightly binning, per-order archives, RV content
//! and the cross-order combination.

pub mod archive;
pub mod combine;
pub mod content;
pub mod nightly;

pub use archive::*;
pub use combine::*;
pub use content::*;
pub use nightly::*;
