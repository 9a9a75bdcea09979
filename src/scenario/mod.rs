//! Scenarios: named, branching phase timelines over one geography.
//!
//! - `registry`: build / clone / edit / predict / simulate scenarios
//! - `predictor`: the external predictor seam and two simple predictors
//! - `compare`: date-aligned comparison tables

pub mod compare;
pub mod predictor;
pub mod registry;

pub use compare::*;
pub use predictor::*;
pub use registry::*;
