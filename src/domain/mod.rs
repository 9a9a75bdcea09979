//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - canonical compartments and observed records (`Sifr`, `Record`, `ObservedSeries`)
//! - phase provenance and fit diagnostics (`PhaseTag`, `Metric`, `FitQuality`)
//! - simulated outputs (`Trajectory`)
//! - engine configuration (`EngineConfig` and its parts)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
