//! Engine configuration.
//!
//! Every knob is passed explicitly into the segmenter / estimator / simulator
//! calls. Nothing is read from ambient global state.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Metric;
use crate::error::{EngineError, EngineResult};

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub simulator: SimulatorConfig,
    pub segmenter: SegmenterConfig,
    pub estimator: EstimatorConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.simulator.validate()?;
        self.segmenter.validate()?;
        self.estimator.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// RK4 steps per day. `1` is a fixed daily step.
    pub substeps: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { substeps: 1 }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.substeps == 0 {
            return Err(EngineError::invalid_parameter("simulator substeps must be >= 1"));
        }
        Ok(())
    }

    /// Integration step size in days.
    pub fn step(&self) -> f64 {
        1.0 / f64::from(self.substeps.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Minimum phase length in days; closer boundaries are tie-broken.
    pub min_phase_days: u32,
    /// Penalty per additional segment, in units of `noise² · ln n`.
    pub penalty: f64,
    /// Minimum number of points the change-point search allows per segment.
    pub min_segment_points: usize,
    /// Lower bound of the noise scale, relative to the signal range.
    pub noise_floor: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_phase_days: 7,
            penalty: 5.0,
            min_segment_points: 3,
            noise_floor: 1e-3,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_phase_days == 0 {
            return Err(EngineError::invalid_parameter("min_phase_days must be >= 1"));
        }
        if !(self.penalty.is_finite() && self.penalty > 0.0) {
            return Err(EngineError::invalid_parameter("segmenter penalty must be finite and > 0"));
        }
        if self.min_segment_points < 3 {
            return Err(EngineError::invalid_parameter("min_segment_points must be >= 3"));
        }
        if !(self.noise_floor.is_finite() && self.noise_floor > 0.0) {
            return Err(EngineError::invalid_parameter("noise_floor must be finite and > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub metric: Metric,
    /// Iteration budget per optimizer run.
    pub max_iterations: usize,
    /// Wall-clock budget per phase (milliseconds), shared by all restarts.
    pub timeout_ms: Option<u64>,
    /// Additional optimizer runs from perturbed seeds.
    pub restarts: usize,
    /// Seed of the restart perturbations.
    pub seed: u64,
    /// Log-normal scale of the restart perturbations.
    pub perturbation: f64,
    /// Convergence tolerance on the standard deviation of the objective
    /// values across the simplex.
    pub f_tolerance: f64,
    /// Absolute score difference treated as indistinguishable.
    pub tie_abs_tolerance: f64,
    /// Relative score difference treated as indistinguishable.
    pub tie_rel_tolerance: f64,
    /// Scores above this are flagged low-confidence.
    pub acceptable_score: f64,
    /// Per-parameter bound overrides: name -> (lower, upper).
    pub bounds: BTreeMap<String, (f64, f64)>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Rmsle,
            max_iterations: 2000,
            timeout_ms: None,
            restarts: 4,
            seed: 0,
            perturbation: 0.2,
            f_tolerance: 1e-12,
            tie_abs_tolerance: 1e-6,
            tie_rel_tolerance: 1e-3,
            acceptable_score: 0.1,
            bounds: BTreeMap::new(),
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_iterations == 0 {
            return Err(EngineError::invalid_parameter("max_iterations must be >= 1"));
        }
        let positive = [
            ("perturbation", self.perturbation),
            ("f_tolerance", self.f_tolerance),
            ("acceptable_score", self.acceptable_score),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(EngineError::invalid_parameter(format!(
                    "{name} must be finite and > 0, got {value}"
                )));
            }
        }
        let non_negative = [
            ("tie_abs_tolerance", self.tie_abs_tolerance),
            ("tie_rel_tolerance", self.tie_rel_tolerance),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(EngineError::invalid_parameter(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
