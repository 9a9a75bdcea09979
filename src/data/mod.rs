//! Observed data: the provider seam and a synthetic sample generator.

pub mod provider;
pub mod sample;

pub use provider::*;
pub use sample::*;
