//! The ODE model abstraction.
//!
//! A model is a static definition: its compartments, its parameter schema
//! (ordered name -> bounds) and its derivative. Models hold no per-phase data,
//! so a single definition is shared by reference (`Arc<dyn OdeModel>`) across
//! phases, timelines and scenarios.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::Serialize;

use crate::domain::Sifr;
use crate::error::{EngineError, EngineResult};

/// Declared parameter of a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub lower: f64,
    pub upper: f64,
    /// Rate parameters (per day) also report `1/value` in days.
    pub rate: bool,
}

/// A compartmental ODE model with a statically declared schema.
pub trait OdeModel: Send + Sync + Debug {
    /// Display name, also the registry key (e.g. `"SIR-F"`).
    fn name(&self) -> &'static str;

    /// Ordered compartment names of the model-internal state.
    fn variables(&self) -> &'static [&'static str];

    /// Ordered parameter schema.
    fn parameters(&self) -> &'static [ParamSpec];

    /// Evaluate the vector field.
    ///
    /// `population` is the (conserved) total of the state.
    fn derivative(&self, t: f64, state: &[f64], params: &[f64], population: f64, out: &mut [f64]);

    /// Canonical records -> model state.
    fn to_state(&self, sifr: &Sifr) -> Vec<f64>;

    /// Model state -> canonical records.
    fn to_sifr(&self, state: &[f64]) -> Sifr;

    /// Phase-dependent reproduction number.
    fn reproduction_number(&self, params: &[f64]) -> f64;

    /// Indices of the variables compared against observations when fitting.
    ///
    /// Defaults to every variable but the first (susceptible).
    fn fitting_variables(&self) -> Vec<usize> {
        (1..self.variables().len()).collect()
    }

    /// Closed-form rough estimate from consecutive daily records, if the
    /// model provides one.
    fn guess(&self, window: &[Sifr], population: f64) -> Option<Vec<f64>> {
        let _ = (window, population);
        None
    }

    fn dimension(&self) -> usize {
        self.variables().len()
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        self.parameters().iter().map(|p| p.name).collect()
    }

    fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters().iter().position(|p| p.name == name)
    }
}

/// Check that a schema is usable: non-empty, unique names, finite `lower < upper`.
pub fn validate_schema(model: &dyn OdeModel) -> EngineResult<()> {
    let invalid = |reason: String| EngineError::InvalidModel {
        model: model.name().to_string(),
        reason,
    };
    if model.name().trim().is_empty() {
        return Err(invalid("empty model name".to_string()));
    }
    if model.variables().len() < 2 {
        return Err(invalid("at least two compartments are required".to_string()));
    }
    if model.parameters().is_empty() {
        return Err(invalid("no parameters declared".to_string()));
    }
    let mut seen = Vec::new();
    for spec in model.parameters() {
        if seen.contains(&spec.name) {
            return Err(invalid(format!("duplicate parameter '{}'", spec.name)));
        }
        seen.push(spec.name);
        if !(spec.lower.is_finite() && spec.upper.is_finite() && spec.lower < spec.upper) {
            return Err(invalid(format!(
                "parameter '{}' has invalid bounds [{}, {}]",
                spec.name, spec.lower, spec.upper
            )));
        }
    }
    for (i, name) in model.variables().iter().enumerate() {
        if model.variables()[..i].contains(name) {
            return Err(invalid(format!("duplicate variable '{name}'")));
        }
    }
    Ok(())
}

/// Effective bounds for one estimation: the schema, optionally narrowed by
/// configuration overrides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterBounds {
    pub names: Vec<&'static str>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ParameterBounds {
    /// Schema bounds of `model`.
    pub fn of(model: &dyn OdeModel) -> Self {
        let specs = model.parameters();
        Self {
            names: specs.iter().map(|p| p.name).collect(),
            lower: specs.iter().map(|p| p.lower).collect(),
            upper: specs.iter().map(|p| p.upper).collect(),
        }
    }

    /// Schema bounds with overrides applied.
    ///
    /// Overrides must name declared parameters and stay inside the schema range.
    pub fn resolve(
        model: &dyn OdeModel,
        overrides: &BTreeMap<String, (f64, f64)>,
    ) -> EngineResult<Self> {
        let mut bounds = Self::of(model);
        for (name, &(lo, hi)) in overrides {
            let idx = model.parameter_index(name).ok_or_else(|| {
                EngineError::invalid_parameter(format!(
                    "model {} has no parameter '{name}'",
                    model.name()
                ))
            })?;
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(EngineError::invalid_parameter(format!(
                    "bounds of '{name}' must be finite with lower < upper, got [{lo}, {hi}]"
                )));
            }
            if lo < bounds.lower[idx] || hi > bounds.upper[idx] {
                return Err(EngineError::invalid_parameter(format!(
                    "bounds of '{name}' [{lo}, {hi}] exceed the schema range [{}, {}]",
                    bounds.lower[idx], bounds.upper[idx]
                )));
            }
            bounds.lower[idx] = lo;
            bounds.upper[idx] = hi;
        }
        Ok(bounds)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn width(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    pub fn midpoint(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| 0.5 * (lo + hi))
            .collect()
    }

    pub fn clamp(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if v.is_finite() {
                    v.clamp(self.lower[i], self.upper[i])
                } else {
                    0.5 * (self.lower[i] + self.upper[i])
                }
            })
            .collect()
    }

    /// Fail with `InvalidParameter` unless `values` has one finite in-bounds
    /// value per parameter.
    pub fn check(&self, values: &[f64]) -> EngineResult<()> {
        if values.len() != self.len() {
            return Err(EngineError::invalid_parameter(format!(
                "expected {} parameter values ({}), got {}",
                self.len(),
                self.names.join(", "),
                values.len()
            )));
        }
        for (i, &v) in values.iter().enumerate() {
            if !v.is_finite() || v < self.lower[i] || v > self.upper[i] {
                return Err(EngineError::invalid_parameter(format!(
                    "{}={v} is outside [{}, {}]",
                    self.names[i], self.lower[i], self.upper[i]
                )));
            }
        }
        Ok(())
    }
}

/// Check parameter values against the schema of `model`.
pub fn check_parameters(model: &dyn OdeModel, values: &[f64]) -> EngineResult<()> {
    ParameterBounds::of(model).check(values)
}

/// `1/value` in days for each rate parameter (`None` when the rate is 0).
pub fn day_parameters(model: &dyn OdeModel, values: &[f64]) -> Vec<(String, Option<f64>)> {
    model
        .parameters()
        .iter()
        .zip(values)
        .filter(|(spec, _)| spec.rate)
        .map(|(spec, &v)| {
            let days = if v > 0.0 { Some(1.0 / v) } else { None };
            (format!("1/{} [day]", spec.name), days)
        })
        .collect()
}
