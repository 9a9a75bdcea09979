//! ODE integration.
//!
//! - `solver`: the RK4 stepper and the phase vector field
//! - `simulator`: daily trajectories with non-negative clamping

pub mod simulator;
pub mod solver;

pub use simulator::*;
pub use solver::*;
