//! Future parameter values.
//!
//! The registry treats predictors as black boxes: given the parameter values
//! of past phases (oldest first), return one parameter vector per future day.
//! Consecutive equal vectors become one Predicted phase.

use crate::domain::ParamVector;
use crate::error::{EngineError, EngineResult};
use crate::math::linear_fit;
use crate::models::{OdeModel, ParameterBounds};

pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, model: &dyn OdeModel, history: &[ParamVector], horizon: usize) -> EngineResult<Vec<ParamVector>>;
}

/// Repeats the latest values.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastValuePredictor;

impl Predictor for LastValuePredictor {
    fn name(&self) -> &str {
        "last-value"
    }

    fn predict(&self, _model: &dyn OdeModel, history: &[ParamVector], horizon: usize) -> EngineResult<Vec<ParamVector>> {
        let last = history
            .last()
            .ok_or_else(|| EngineError::Predictor("no parameter history".to_string()))?;
        Ok(vec![last.clone(); horizon])
    }
}

/// Per-parameter linear trend over the most recent phases.
///
/// Each parameter is regressed on the phase index; future day `d` belongs to
/// phase index `n + d / days_per_phase`. Values are clamped to the schema
/// bounds.
#[derive(Debug, Clone, Copy)]
pub struct LinearTrendPredictor {
    /// Number of most recent phases used for the regression.
    pub window: usize,
    pub days_per_phase: usize,
}

impl Default for LinearTrendPredictor {
    fn default() -> Self {
        Self {
            window: 4,
            days_per_phase: 14,
        }
    }
}

impl Predictor for LinearTrendPredictor {
    fn name(&self) -> &str {
        "linear-trend"
    }

    fn predict(&self, model: &dyn OdeModel, history: &[ParamVector], horizon: usize) -> EngineResult<Vec<ParamVector>> {
        if self.days_per_phase == 0 || self.window == 0 {
            return Err(EngineError::invalid_parameter(
                "linear trend needs window >= 1 and days_per_phase >= 1",
            ));
        }
        if history.is_empty() {
            return Err(EngineError::Predictor("no parameter history".to_string()));
        }
        let recent = &history[history.len().saturating_sub(self.window)..];
        if recent.len() < 2 {
            return LastValuePredictor.predict(model, history, horizon);
        }

        let n = recent.len();
        let index: Vec<f64> = (0..n).map(|k| k as f64).collect();
        let coefficients = (0..recent[0].len())
            .map(|j| {
                let values: Vec<f64> = recent.iter().map(|v| v[j]).collect();
                linear_fit(&index, &values)
                    .ok_or_else(|| EngineError::Predictor("trend regression is ill-conditioned".to_string()))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let bounds = ParameterBounds::of(model);
        Ok((0..horizon)
            .map(|d| {
                let k = (n + d / self.days_per_phase) as f64;
                let raw: Vec<f64> = coefficients.iter().map(|(a, b)| a + b * k).collect();
                bounds.clamp(&raw)
            })
            .collect())
    }
}

/// Group consecutive equal vectors: `(days, values)` runs.
pub fn compress_runs(values: Vec<ParamVector>) -> Vec<(usize, ParamVector)> {
    let mut runs: Vec<(usize, ParamVector)> = Vec::new();
    for v in values {
        if let Some((days, last)) = runs.last_mut() {
            if *last == v {
                *days += 1;
                continue;
            }
        }
        runs.push((1, v));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sir;

    #[test]
    fn last_value_repeats_the_latest_phase() {
        let history = vec![vec![0.3, 0.1], vec![0.2, 0.1]];
        let out = LastValuePredictor.predict(&Sir, &history, 3).unwrap();
        assert_eq!(out, vec![vec![0.2, 0.1]; 3]);
        assert!(LastValuePredictor.predict(&Sir, &[], 3).is_err());
    }

    #[test]
    fn linear_trend_extrapolates_per_phase_and_clamps() {
        let history = vec![vec![0.30, 0.10], vec![0.22, 0.10], vec![0.14, 0.10]];
        let p = LinearTrendPredictor {
            window: 3,
            days_per_phase: 5,
        };
        let out = p.predict(&Sir, &history, 30).unwrap();
        assert_eq!(out.len(), 30);
        assert!((out[0][0] - 0.06).abs() < 1e-9);
        assert!((out[4][0] - 0.06).abs() < 1e-9);
        assert!((out[0][1] - 0.10).abs() < 1e-9);
        // The trend crosses the lower bound after one phase and stays there.
        assert_eq!(out[5][0], 0.0);
        assert_eq!(out[29][0], 0.0);
    }

    #[test]
    fn compress_runs_groups_equal_neighbours() {
        let runs = compress_runs(vec![vec![1.0], vec![1.0], vec![2.0], vec![1.0]]);
        assert_eq!(runs, vec![(2, vec![1.0]), (1, vec![2.0]), (1, vec![1.0])]);
        assert!(compress_runs(Vec::new()).is_empty());
    }
}
