//! Parameter estimation.
//!
//! Responsibilities:
//!
//! - score simulated against observed trajectories (`metric`)
//! - bounded Nelder-Mead on the unit box, run by `argmin` (`optimizer`)
//! - seeded, parallel multi-start estimation of one phase with a
//!   closest-to-seed tie-break (`estimator`)

pub mod estimator;
pub mod metric;
pub mod optimizer;

pub use estimator::*;
pub use metric::*;
pub use optimizer::*;
