//! Per-phase parameter estimation.
//!
//! Given:
//! - an ODE model and the observed records of one phase
//! - the model state on the first day of the phase
//! - parameter bounds (the model schema, optionally narrowed)
//! - optionally the previous phase's estimate
//!
//! we minimize the error between the simulated and observed trajectories with
//! bounded Nelder-Mead (`argmin`) in normalized coordinates:
//! - run 0 starts from the seed (previous estimate, closed-form guess, or
//!   bound midpoints, in that order)
//! - runs 1..=restarts start from log-normal perturbations of the seed drawn
//!   from a seeded RNG, so results are reproducible
//! - runs are evaluated in parallel (rayon) and merged deterministically
//!
//! Among runs whose scores are indistinguishable from the best, the one
//! closest to the seed wins (minimal parameter change between phases).

use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::domain::{Confidence, EstimatorConfig, FitQuality, ParamVector, Sifr, SimulatorConfig};
use crate::error::{EngineError, EngineResult};
use crate::fit::metric::score;
use crate::fit::optimizer::{Minimum, SimplexOptions, minimize};
use crate::models::{OdeModel, ParameterBounds};
use crate::sim::simulator::{check_initial_state, integrate};

/// Best-found parameters of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimation {
    pub params: ParamVector,
    pub quality: FitQuality,
    /// Starting point of the first run.
    pub seed: ParamVector,
}

impl Estimation {
    pub fn is_acceptable(&self) -> bool {
        self.quality.confidence == Confidence::High
    }

    /// The failure to report for a low-confidence fit of `phase`, if any.
    pub fn failure(&self, phase: &str) -> Option<EngineError> {
        (!self.is_acceptable()).then(|| EngineError::EstimationFailure {
            phase: phase.to_string(),
            params: self.params.clone(),
            score: self.quality.score,
        })
    }

    /// Turn a low-confidence fit into [`EngineError::EstimationFailure`].
    pub fn ensure_quality(self, phase: &str) -> EngineResult<Self> {
        match self.failure(phase) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
struct Run {
    index: usize,
    start: Vec<f64>,
    minimum: Minimum,
}

/// Estimate the parameters of `model` on one phase.
///
/// `observed` holds the canonical records of every day of the phase (first
/// day included); `initial` is the model state the simulation starts from.
pub fn estimate(
    model: &dyn OdeModel,
    observed: &[Sifr],
    initial: &[f64],
    bounds: &ParameterBounds,
    previous: Option<&[f64]>,
    config: &EstimatorConfig,
    sim_config: &SimulatorConfig,
) -> EngineResult<Estimation> {
    config.validate()?;
    sim_config.validate()?;
    check_initial_state(model, initial)?;
    if bounds.len() != model.parameters().len() {
        return Err(EngineError::invalid_parameter(format!(
            "{} bounds given for {} parameters of {}",
            bounds.len(),
            model.parameters().len(),
            model.name()
        )));
    }
    if observed.len() < 2 {
        return Err(EngineError::invalid_series(
            "at least two observed days are required to estimate a phase",
        ));
    }

    let population: f64 = initial.iter().sum();
    let targets: Vec<Vec<f64>> = observed.iter().map(|v| model.to_state(v)).collect();
    let columns = model.fitting_variables();
    let days = observed.len() - 1;

    let seed = seed_parameters(model, observed, population, bounds, previous);
    let seed_u = normalize(bounds, &seed);

    let objective = |u: &[f64]| {
        let params = denormalize(bounds, u);
        let simulated = integrate(model, initial, &params, days, sim_config);
        score(config.metric, &simulated, &targets, &columns)
    };

    let options = SimplexOptions {
        max_iterations: config.max_iterations,
        f_tolerance: config.f_tolerance,
        deadline: config.timeout().map(|t| Instant::now() + t),
    };

    let starts = restart_points(&seed_u, config)?;
    let runs: Vec<Run> = starts
        .into_par_iter()
        .enumerate()
        .map(|(index, start)| {
            let minimum = minimize(&objective, &start, &options)?;
            Ok(Run {
                index,
                start,
                minimum,
            })
        })
        .collect::<EngineResult<_>>()?;

    let chosen = select_run(&runs, &seed_u, config)
        .ok_or_else(|| EngineError::invalid_parameter("no optimizer run was executed"))?;
    let score = chosen.minimum.value;
    let params = denormalize(bounds, &chosen.minimum.x);
    let confidence = if score.is_finite() && score <= config.acceptable_score {
        Confidence::High
    } else {
        Confidence::Low
    };

    let quality = FitQuality {
        metric: config.metric,
        score,
        iterations: chosen.minimum.iterations,
        evaluations: runs.iter().map(|r| r.minimum.evaluations).sum(),
        restarts: runs.len() - 1,
        converged: chosen.minimum.converged,
        confidence,
    };

    debug!(
        model = model.name(),
        days = observed.len(),
        run = chosen.index,
        start = ?chosen.start,
        score,
        iterations = quality.iterations,
        evaluations = quality.evaluations,
        "phase estimated"
    );

    Ok(Estimation {
        params,
        quality,
        seed,
    })
}

/// Previous estimate, then closed-form guess, then bound midpoints; always
/// clamped into `bounds`.
fn seed_parameters(
    model: &dyn OdeModel,
    observed: &[Sifr],
    population: f64,
    bounds: &ParameterBounds,
    previous: Option<&[f64]>,
) -> ParamVector {
    let usable = |v: &[f64]| v.len() == bounds.len() && v.iter().all(|x| x.is_finite());
    if let Some(prev) = previous.filter(|p| usable(*p)) {
        return bounds.clamp(prev);
    }
    match model.guess(observed, population) {
        Some(guess) if usable(guess.as_slice()) => bounds.clamp(&guess),
        _ => bounds.midpoint(),
    }
}

fn normalize(bounds: &ParameterBounds, values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| ((v - bounds.lower[i]) / bounds.width(i)).clamp(0.0, 1.0))
        .collect()
}

fn denormalize(bounds: &ParameterBounds, u: &[f64]) -> Vec<f64> {
    u.iter()
        .enumerate()
        .map(|(i, x)| (bounds.lower[i] + x.clamp(0.0, 1.0) * bounds.width(i)).clamp(bounds.lower[i], bounds.upper[i]))
        .collect()
}

/// The seed followed by `restarts` perturbed copies.
///
/// Restart `k` draws from its own `StdRng` seeded with `seed + k`, so the
/// points do not depend on how runs are scheduled.
fn restart_points(seed_u: &[f64], config: &EstimatorConfig) -> EngineResult<Vec<Vec<f64>>> {
    let normal = Normal::new(0.0, config.perturbation)
        .map_err(|e| EngineError::invalid_parameter(format!("perturbation: {e}")))?;
    let mut points = Vec::with_capacity(config.restarts + 1);
    points.push(seed_u.to_vec());
    for k in 1..=config.restarts {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(k as u64));
        let point = seed_u
            .iter()
            .map(|&u| {
                let z: f64 = normal.sample(&mut rng);
                let v = if u > 1e-12 { u * z.exp() } else { z.abs() * 0.1 };
                v.clamp(0.0, 1.0)
            })
            .collect();
        points.push(point);
    }
    Ok(points)
}

/// Best run, with ties (within the configured tolerances) resolved by the
/// smallest distance to the seed, then by run index.
fn select_run<'a>(runs: &'a [Run], seed_u: &[f64], config: &EstimatorConfig) -> Option<&'a Run> {
    let best = runs
        .iter()
        .map(|r| r.minimum.value)
        .fold(f64::INFINITY, f64::min);
    let threshold = if best.is_finite() {
        best + config.tie_abs_tolerance + config.tie_rel_tolerance * best.abs()
    } else {
        f64::INFINITY
    };
    let distance = |x: &[f64]| -> f64 {
        x.iter()
            .zip(seed_u)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    };
    runs.iter()
        .filter(|r| r.minimum.value <= threshold)
        .min_by(|a, b| {
            distance(&a.minimum.x)
                .total_cmp(&distance(&b.minimum.x))
                .then(a.index.cmp(&b.index))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metric;
    use crate::models::{Sir, Sirf};

    fn sir_observed(rho: f64, sigma: f64, days: usize) -> (Vec<f64>, Vec<Sifr>) {
        let x0 = Sir.to_state(&Sifr::new(999_000.0, 1_000.0, 0.0, 0.0));
        let states = integrate(&Sir, &x0, &[rho, sigma], days - 1, &SimulatorConfig::default());
        let observed = states.iter().map(|s| Sir.to_sifr(s)).collect();
        (x0, observed)
    }

    /// Multiplicative N(1, level) noise on the infected and recovered counts.
    fn with_noise(observed: &[Sifr], level: f64, seed: u64) -> Vec<Sifr> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(1.0, level).unwrap();
        observed
            .iter()
            .map(|v| {
                let infected = v.infected * normal.sample(&mut rng);
                let recovered = v.recovered * normal.sample(&mut rng);
                Sifr::new(v.total() - infected - recovered - v.fatal, infected, v.fatal, recovered)
            })
            .collect()
    }

    fn relative_error(a: f64, b: f64) -> f64 {
        (a - b).abs() / b.abs()
    }

    #[test]
    fn recovers_sir_parameters_from_noisy_data() {
        let (x0, clean) = sir_observed(0.2, 0.075, 60);
        let observed = with_noise(&clean, 0.001, 7);
        let bounds = ParameterBounds::of(&Sir);
        let config = EstimatorConfig::default();

        let est = estimate(&Sir, &observed, &x0, &bounds, None, &config, &SimulatorConfig::default())
            .unwrap();
        assert!(relative_error(est.params[0], 0.2) < 0.05, "{:?}", est.params);
        assert!(relative_error(est.params[1], 0.075) < 0.05, "{:?}", est.params);
        assert!(est.is_acceptable());
        assert_eq!(est.quality.restarts, config.restarts);
    }

    #[test]
    fn recovers_sir_parameters_from_midpoint_seed() {
        let (x0, observed) = sir_observed(0.2, 0.075, 60);
        let bounds = ParameterBounds::of(&Sir);
        let midpoint = bounds.midpoint();
        let est = estimate(
            &Sir,
            &observed,
            &x0,
            &bounds,
            Some(midpoint.as_slice()),
            &EstimatorConfig::default(),
            &SimulatorConfig::default(),
        )
        .unwrap();
        assert_eq!(est.seed, midpoint);
        assert!(relative_error(est.params[0], 0.2) < 0.05, "{:?}", est.params);
        assert!(relative_error(est.params[1], 0.075) < 0.05, "{:?}", est.params);
    }

    #[test]
    fn estimation_is_reproducible() {
        let (x0, clean) = sir_observed(0.25, 0.1, 40);
        let observed = with_noise(&clean, 0.01, 3);
        let bounds = ParameterBounds::of(&Sir);
        let config = EstimatorConfig {
            seed: 42,
            ..EstimatorConfig::default()
        };
        let run = || estimate(&Sir, &observed, &x0, &bounds, None, &config, &SimulatorConfig::default()).unwrap();
        let (a, b) = (run(), run());
        assert_eq!(a.params, b.params);
        assert_eq!(a.quality.score, b.quality.score);
    }

    #[test]
    fn estimates_stay_inside_narrowed_bounds() {
        let (x0, observed) = sir_observed(0.2, 0.075, 30);
        let mut config = EstimatorConfig::default();
        config.bounds.insert("rho".to_string(), (0.3, 0.6));
        let bounds = ParameterBounds::resolve(&Sir, &config.bounds).unwrap();
        let est = estimate(&Sir, &observed, &x0, &bounds, None, &config, &SimulatorConfig::default())
            .unwrap();
        assert!((0.3..=0.6).contains(&est.params[0]), "{:?}", est.params);
    }

    #[test]
    fn poor_fit_is_reported_with_the_best_parameters() {
        let (x0, observed) = sir_observed(0.2, 0.075, 60);
        let config = EstimatorConfig {
            acceptable_score: 1e-12,
            max_iterations: 5,
            restarts: 0,
            ..EstimatorConfig::default()
        };
        let est = estimate(&Sir, &observed, &x0, &ParameterBounds::of(&Sir), None, &config, &SimulatorConfig::default())
            .unwrap();
        assert_eq!(est.quality.confidence, Confidence::Low);
        match est.clone().ensure_quality("1st").unwrap_err() {
            EngineError::EstimationFailure { phase, params, score } => {
                assert_eq!(phase, "1st");
                assert_eq!(params, est.params);
                assert_eq!(score, est.quality.score);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn timeout_bounds_the_work() {
        let (x0, observed) = sir_observed(0.2, 0.075, 60);
        let config = EstimatorConfig {
            timeout_ms: Some(0),
            ..EstimatorConfig::default()
        };
        let est = estimate(&Sir, &observed, &x0, &ParameterBounds::of(&Sir), None, &config, &SimulatorConfig::default())
            .unwrap();
        assert_eq!(est.quality.iterations, 0);
        assert!(!est.quality.converged);
    }

    #[test]
    fn rejects_single_day_and_wrong_state() {
        let (x0, observed) = sir_observed(0.2, 0.075, 10);
        let bounds = ParameterBounds::of(&Sir);
        let cfg = EstimatorConfig::default();
        let sim = SimulatorConfig::default();
        assert!(matches!(
            estimate(&Sir, &observed[..1], &x0, &bounds, None, &cfg, &sim),
            Err(EngineError::InvalidSeries(_))
        ));
        assert!(matches!(
            estimate(&Sir, &observed, &[1.0, 2.0], &bounds, None, &cfg, &sim),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            estimate(&Sirf, &observed, &x0, &bounds, None, &cfg, &sim),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn ties_prefer_the_run_closest_to_the_seed() {
        let run = |index: usize, x: Vec<f64>, value: f64| Run {
            index,
            start: x.clone(),
            minimum: Minimum {
                x,
                value,
                iterations: 1,
                evaluations: 1,
                converged: true,
            },
        };
        let runs = vec![
            run(0, vec![0.9, 0.9], 0.010_000),
            run(1, vec![0.52, 0.5], 0.010_001),
            run(2, vec![0.1, 0.1], 0.5),
        ];
        let config = EstimatorConfig::default();
        let chosen = select_run(&runs, &[0.5, 0.5], &config).unwrap();
        assert_eq!(chosen.index, 1);

        let strict = EstimatorConfig {
            tie_abs_tolerance: 0.0,
            tie_rel_tolerance: 0.0,
            ..EstimatorConfig::default()
        };
        assert_eq!(select_run(&runs, &[0.5, 0.5], &strict).unwrap().index, 0);
    }

    #[test]
    fn metric_choice_is_reported() {
        let (x0, observed) = sir_observed(0.2, 0.075, 20);
        let config = EstimatorConfig {
            metric: Metric::Rmsre,
            restarts: 1,
            ..EstimatorConfig::default()
        };
        let est = estimate(&Sir, &observed, &x0, &ParameterBounds::of(&Sir), None, &config, &SimulatorConfig::default())
            .unwrap();
        assert_eq!(est.quality.metric, Metric::Rmsre);
    }
}
