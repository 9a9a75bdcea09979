//! Side-by-side comparison of scenarios.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::domain::{SIFR_VARIABLES, SimulatorConfig, CONFIRMED, FATAL_OR_RECOVERED};
use crate::dynamics::Dynamics;
use crate::error::{EngineError, EngineResult};

/// What to put in the comparison columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum CompareMetric {
    /// A simulated canonical variable (`Infected`, `Confirmed`, ...).
    Variable(String),
    /// A model parameter in effect on each day.
    Parameter(String),
    /// Reproduction number in effect on each day.
    Rt,
}

impl CompareMetric {
    /// Parse a metric name: `Rt`, a canonical variable, or a parameter name.
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("rt") {
            CompareMetric::Rt
        } else if SIFR_VARIABLES.contains(&name) || name == CONFIRMED || name == FATAL_OR_RECOVERED {
            CompareMetric::Variable(name.to_string())
        } else {
            CompareMetric::Parameter(name.to_string())
        }
    }
}

impl fmt::Display for CompareMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMetric::Variable(name) | CompareMetric::Parameter(name) => f.write_str(name),
            CompareMetric::Rt => f.write_str("Rt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub date: NaiveDate,
    /// One value per scenario, `None` where a scenario does not cover the date.
    pub values: Vec<Option<f64>>,
}

/// Values of several scenarios aligned on the union of their dates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTable {
    pub metric: CompareMetric,
    pub scenarios: Vec<String>,
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    pub fn column(&self, scenario: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.scenarios.iter().position(|s| s == scenario)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Row of `date`, if any scenario covers it.
    pub fn row(&self, date: NaiveDate) -> Option<&ComparisonRow> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.rows[i])
    }
}

pub fn compare(
    metric: &CompareMetric,
    scenarios: &[(&str, &Dynamics)],
    config: &SimulatorConfig,
) -> EngineResult<ComparisonTable> {
    let columns = scenarios
        .iter()
        .map(|(_, dynamics)| daily_values(metric, dynamics, config))
        .collect::<EngineResult<Vec<_>>>()?;

    let dates: BTreeSet<NaiveDate> = columns.iter().flat_map(|c| c.keys().copied()).collect();
    let rows = dates
        .into_iter()
        .map(|date| ComparisonRow {
            date,
            values: columns.iter().map(|c| c.get(&date).copied()).collect(),
        })
        .collect();

    Ok(ComparisonTable {
        metric: metric.clone(),
        scenarios: scenarios.iter().map(|(name, _)| name.to_string()).collect(),
        rows,
    })
}

fn daily_values(
    metric: &CompareMetric,
    dynamics: &Dynamics,
    config: &SimulatorConfig,
) -> EngineResult<BTreeMap<NaiveDate, f64>> {
    match metric {
        CompareMetric::Variable(variable) => {
            let trajectory = dynamics.simulate(config)?;
            let mut out = BTreeMap::new();
            for (pos, row) in trajectory.rows.iter().enumerate() {
                let value = trajectory
                    .sifr_row(pos)
                    .and_then(|v| v.get(variable))
                    .ok_or_else(|| EngineError::invalid_parameter(format!("unknown variable '{variable}'")))?;
                out.insert(row.date, value);
            }
            Ok(out)
        }
        CompareMetric::Parameter(name) => {
            let model = dynamics.model();
            let idx = model.parameter_index(name).ok_or_else(|| {
                EngineError::invalid_parameter(format!("{} has no parameter '{name}'", model.name()))
            })?;
            per_day(dynamics, |values| values[idx])
        }
        CompareMetric::Rt => {
            let model = dynamics.model();
            per_day(dynamics, |values| model.reproduction_number(values))
        }
    }
}

fn per_day(dynamics: &Dynamics, f: impl Fn(&[f64]) -> f64) -> EngineResult<BTreeMap<NaiveDate, f64>> {
    let params = dynamics.effective_parameters()?;
    let mut out = BTreeMap::new();
    for (phase, values) in dynamics.phases().iter().zip(&params) {
        let value = f(values);
        for k in 0..phase.days() {
            out.insert(phase.start + Duration::days(k), value);
        }
    }
    Ok(out)
}
