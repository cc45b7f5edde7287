//! Per-order forward model collection.
//!
//! - `forward`: the collection itself and its pass loop
//! - `nights`: night grouping of sorted observation times
//! - `history`: per-spectrum append-only fit logs
//! - `rv_table`: the append-only RV table

pub mod forward;
pub mod history;
pub mod nights;
pub mod rv_table;

pub use forward::*;
pub use history::*;
pub use nights::*;
pub use rv_table::*;
