//! Phase timelines.
//!
//! - `phase`: one date range with constant parameters and its provenance
//! - `timeline`: the contiguous phase sequence of one scenario

pub mod phase;
pub mod timeline;

pub use phase::*;
pub use timeline::*;
