//! Bounded Nelder-Mead on the unit box, run by `argmin`.
//!
//! Callers normalize their parameters to `[0, 1]^d`. The objective is only
//! ever evaluated on the box: a trial point outside it is projected back, and
//! its squared distance to the box is added to the cost so the simplex is
//! pulled inside.

use std::time::Instant;

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;

use crate::error::EngineResult;

/// Cost reported for a point where the objective is not finite.
const NON_FINITE_COST: f64 = 1e12;

/// Stopping rules of one run.
#[derive(Debug, Clone, Copy)]
pub struct SimplexOptions {
    pub max_iterations: usize,
    /// Converged once the standard deviation of the simplex costs drops
    /// below this.
    pub f_tolerance: f64,
    /// Hard wall-clock stop.
    pub deadline: Option<Instant>,
}

/// Best point found by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// `argmin` problem: an objective over the unit box.
struct UnitBox<'a, F> {
    objective: &'a F,
}

impl<F> CostFunction for UnitBox<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, Error> {
        let inside = project(u);
        let outside: f64 = u.iter().zip(&inside).map(|(a, b)| (a - b).powi(2)).sum();
        let value = (self.objective)(&inside);
        Ok(if value.is_finite() { value + outside } else { NON_FINITE_COST })
    }
}

fn project(u: &[f64]) -> Vec<f64> {
    u.iter()
        .map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
        .collect()
}

/// Initial simplex: `x0` plus one vertex per axis, offset by 5% of the
/// coordinate (or 0.00025 at zero), stepping inwards at the upper bound.
fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for i in 0..x0.len() {
        let mut v = x0.to_vec();
        let step = if x0[i] != 0.0 { 0.05 * x0[i] } else { 0.00025 };
        v[i] = if x0[i] + step <= 1.0 { x0[i] + step } else { x0[i] - step };
        simplex.push(project(&v));
    }
    simplex
}

/// Minimize `f` over the unit box from `x0`.
pub fn minimize<F>(f: &F, x0: &[f64], options: &SimplexOptions) -> EngineResult<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let start = project(x0);
    let remaining = options
        .deadline
        .map(|d| d.saturating_duration_since(Instant::now()));
    if remaining.is_some_and(|r| r.is_zero()) {
        let value = f(&start);
        return Ok(Minimum {
            x: start,
            value: if value.is_finite() { value } else { f64::INFINITY },
            iterations: 0,
            evaluations: 1,
            converged: false,
        });
    }

    let solver = NelderMead::new(initial_simplex(&start)).with_sd_tolerance(options.f_tolerance)?;
    let max_iters = options.max_iterations as u64;
    let mut executor = Executor::new(UnitBox { objective: f }, solver).configure(|state| state.max_iters(max_iters));
    if let Some(timeout) = remaining {
        executor = executor.timeout(timeout);
    }
    let result = executor.run()?;
    let state = result.state();

    let x = project(state.get_best_param().map_or(start.as_slice(), |p| p.as_slice()));
    let value = f(&x);
    let evaluations = state.get_func_counts().values().sum::<u64>() as usize + 1;
    Ok(Minimum {
        x,
        value: if value.is_finite() { value } else { f64::INFINITY },
        iterations: state.get_iter() as usize,
        evaluations,
        converged: matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        ),
    })
}
