//! Fixed-step simulation of one phase.
//!
//! Compartments are clamped to zero after every RK4 step: population counts
//! cannot go negative, even when the scheme overshoots with large rates.

use chrono::{Duration, NaiveDate};

use crate::domain::{SimulatorConfig, Trajectory, TrajectoryRow};
use crate::error::{EngineError, EngineResult};
use crate::models::{OdeModel, check_parameters};
use crate::sim::solver::{PhaseField, Rk4, Steppable};

/// Integrate `model` from `initial` on `start` to `end` (inclusive) with fixed
/// parameters, returning one row per day. The first row is `initial`.
pub fn simulate(
    model: &dyn OdeModel,
    initial: &[f64],
    params: &[f64],
    start: NaiveDate,
    end: NaiveDate,
    config: &SimulatorConfig,
) -> EngineResult<Trajectory> {
    EngineError::check_range(start, end)?;
    check_parameters(model, params)?;
    check_initial_state(model, initial)?;
    config.validate()?;

    let days = usize::try_from((end - start).num_days())
        .map_err(|_| EngineError::InvalidRange { start, end })?;
    let states = integrate(model, initial, params, days, config);

    let rows = states
        .into_iter()
        .enumerate()
        .map(|(i, values)| TrajectoryRow {
            date: start + Duration::days(i as i64),
            values,
        })
        .collect();

    Ok(Trajectory {
        model: model.name().to_string(),
        variables: model.variables().iter().map(|v| v.to_string()).collect(),
        rows,
    })
}

/// Validate an initial state: one finite, non-negative value per compartment
/// with a positive total.
pub fn check_initial_state(model: &dyn OdeModel, initial: &[f64]) -> EngineResult<()> {
    if initial.len() != model.dimension() {
        return Err(EngineError::invalid_parameter(format!(
            "{} expects {} compartments, got {}",
            model.name(),
            model.dimension(),
            initial.len()
        )));
    }
    if initial.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(EngineError::invalid_parameter(
            "initial compartments must be finite and non-negative",
        ));
    }
    if initial.iter().sum::<f64>() <= 0.0 {
        return Err(EngineError::invalid_parameter("initial compartments sum to zero"));
    }
    Ok(())
}

/// Unchecked integration loop shared by [`simulate`] and the estimator.
///
/// Returns `days + 1` states. Callers validate the inputs.
pub(crate) fn integrate(
    model: &dyn OdeModel,
    initial: &[f64],
    params: &[f64],
    days: usize,
    config: &SimulatorConfig,
) -> Vec<Vec<f64>> {
    let population: f64 = initial.iter().sum();
    let field = PhaseField {
        model,
        params,
        population,
    };
    let substeps = config.substeps.max(1);
    let dt = config.step();

    let mut solver = Rk4::new(initial.len());
    let mut state = initial.to_vec();
    let mut t = 0.0;
    let mut out = Vec::with_capacity(days + 1);
    out.push(state.clone());

    for _ in 0..days {
        for _ in 0..substeps {
            solver.step(&field, &mut t, &mut state, dt);
            for v in state.iter_mut() {
                if v.is_nan() || *v < 0.0 {
                    *v = 0.0;
                }
            }
        }
        out.push(state.clone());
    }
    out
}
