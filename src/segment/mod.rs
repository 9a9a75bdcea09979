//! Phase boundary detection.
//!
//! - `signal`: the S-R transform of an observed series
//! - `detector`: penalized change-point search with a minimum phase length

pub mod detector;
pub mod signal;

pub use detector::*;
pub use signal::*;
