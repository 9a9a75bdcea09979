//! Shared "scenario pipeline" logic used by the CLI front-end.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! synthetic records -> provider -> Baseline build -> branch -> predict ->
//! compare -> describe
//!
//! The CLI can then focus on presentation (tables vs JSON).

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::data::{InMemoryProvider, SampleBuilder};
use crate::domain::{EngineConfig, ParamVector};
use crate::dynamics::PhaseSummary;
use crate::error::{AppError, EngineError};
use crate::fit::Estimation;
use crate::models::{ModelRegistry, Sirf};
use crate::scenario::{
    BASELINE, Branch, CompareMetric, ComparisonTable, Predictor, ScenarioDescription, ScenarioRegistry,
};

pub const LOCKDOWN: &str = "Lockdown";

/// What the demo generates and which scenarios it derives.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoSettings {
    /// Model fitted to the records.
    pub model: String,
    pub geo: String,
    pub population: f64,
    pub initial_infected: f64,
    pub days: usize,
    /// SIR-F truth `[theta, kappa, rho, sigma]` from day 0.
    pub truth: ParamVector,
    /// Regime change: day and the SIR-F truth from that day on.
    pub change: Option<(usize, ParamVector)>,
    pub noise: f64,
    pub seed: u64,
    pub horizon: usize,
    /// Contact rate of the Lockdown branch; no branch when `None`.
    pub lockdown_rho: Option<f64>,
    pub compare: CompareMetric,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub branch: Option<Branch>,
    pub phases: Vec<PhaseSummary>,
}

/// All computed outputs of a single `psir demo` run.
#[derive(Debug, Clone, Serialize)]
pub struct DemoRun {
    pub geo: String,
    pub today: Option<NaiveDate>,
    pub config: EngineConfig,
    pub true_change: Option<NaiveDate>,
    pub estimations: Vec<Estimation>,
    pub scenarios: Vec<ScenarioReport>,
    pub comparison: ComparisonTable,
    pub descriptions: Vec<ScenarioDescription>,
}

/// Execute the full demo pipeline and return the computed outputs.
pub fn run_demo(settings: &DemoSettings, config: &EngineConfig, predictor: &dyn Predictor) -> Result<DemoRun, AppError> {
    // 1) Synthetic SIR-F records.
    let mut builder = SampleBuilder::new(Arc::new(Sirf), settings.population)
        .geo(settings.geo.clone())
        .days(settings.days)
        .initial_infected(settings.initial_infected)
        .regime(0, settings.truth.clone())
        .noise(settings.noise)
        .seed(settings.seed)
        .simulator(config.simulator.clone());
    if let Some((day, params)) = &settings.change {
        builder = builder.regime(*day, params.clone());
    }
    let true_change = settings
        .change
        .as_ref()
        .map(|(day, _)| builder.first_date() + Duration::days(*day as i64));
    let provider = InMemoryProvider::new().with(builder.build()?);

    // 2) Baseline from the records.
    let mut registry = ScenarioRegistry::new(ModelRegistry::with_builtin(), config.clone());
    let estimations = registry.build(&provider, &settings.geo, &settings.model, None)?;
    let today = registry.today();

    // 3) Lockdown branch with a lower contact rate after today.
    let mut names = vec![BASELINE];
    if let (Some(rho), Some(today)) = (settings.lockdown_rho, today) {
        if settings.horizon > 0 {
            registry.clone_scenario(BASELINE, LOCKDOWN, None)?;
            let params = lockdown_parameters(&registry, rho)?;
            registry.append(LOCKDOWN, today + Duration::days(settings.horizon as i64), Some(params))?;
            names.push(LOCKDOWN);
        }
    }

    // 4) Predicted future of the Baseline.
    if settings.horizon > 0 {
        registry.predict(BASELINE, settings.horizon, predictor)?;
    }

    // 5) Side-by-side outputs.
    let comparison = registry.compare(&settings.compare, &names)?;
    let descriptions = registry.describe(&names)?;
    let scenarios = names
        .iter()
        .map(|&name| {
            Ok(ScenarioReport {
                name: name.to_string(),
                branch: registry.branch(name)?.cloned(),
                phases: registry.summary(name)?,
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    Ok(DemoRun {
        geo: settings.geo.clone(),
        today,
        config: config.clone(),
        true_change,
        estimations,
        scenarios,
        comparison,
        descriptions,
    })
}

/// Baseline's latest parameter values with `rho` replaced.
fn lockdown_parameters(registry: &ScenarioRegistry, rho: f64) -> Result<ParamVector, EngineError> {
    let baseline = registry.get(BASELINE)?;
    let model = baseline.model();
    let index = model
        .parameter_index("rho")
        .ok_or_else(|| EngineError::invalid_parameter(format!("{} has no contact rate 'rho'", model.name())))?;
    let mut params = baseline
        .effective_parameters()?
        .pop()
        .ok_or_else(|| EngineError::MissingParameters(BASELINE.to_string()))?;
    params[index] = rho;
    Ok(params)
}
