//! SIR-derived ODE model definitions.
//!
//! Models are static definitions (compartments, parameter schema, vector
//! field) so that simulation and fitting code can stay generic.

pub mod model;
pub mod registry;
pub mod sir;

pub use model::*;
pub use registry::*;
pub use sir::*;
