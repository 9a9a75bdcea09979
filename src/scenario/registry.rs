//! Named scenarios over one observed geography.
//!
//! Every scenario is a [`Dynamics`] timeline. `Baseline` is built from the
//! records; other scenarios are branched from an existing one at the last
//! observed date and share its phase records up to that date.
//!
//! Branch invariant: for a scenario branched from `parent` at date `D`, every
//! parent phase ending on or before `D` appears unchanged at the same position
//! in the child, and a parent phase running across `D` keeps the child's
//! values up to `D`. Edits that would break it (on either side) are rejected.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::data::DataProvider;
use crate::domain::{EngineConfig, ParamVector, Trajectory};
use crate::dynamics::{Dynamics, EditAction, Phase, PhaseSummary, SegmentMode};
use crate::error::{EngineError, EngineResult};
use crate::fit::Estimation;
use crate::models::{ModelRegistry, check_parameters};
use crate::scenario::compare::{CompareMetric, ComparisonTable, compare};
use crate::scenario::predictor::{Predictor, compress_runs};

pub const BASELINE: &str = "Baseline";

/// Where a scenario was branched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub parent: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioEntry {
    pub dynamics: Dynamics,
    pub branch: Option<Branch>,
}

/// Headline numbers of one simulated scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioDescription {
    pub name: String,
    pub max_infected: f64,
    pub max_date: NaiveDate,
    pub final_date: NaiveDate,
    pub final_confirmed: f64,
    pub final_fatal: f64,
    pub final_rt: f64,
}

pub struct ScenarioRegistry {
    models: ModelRegistry,
    config: EngineConfig,
    today: Option<NaiveDate>,
    scenarios: BTreeMap<String, ScenarioEntry>,
}

impl ScenarioRegistry {
    pub fn new(models: ModelRegistry, config: EngineConfig) -> Self {
        Self {
            models,
            config,
            today: None,
            scenarios: BTreeMap::new(),
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last observed date of the Baseline records.
    pub fn today(&self) -> Option<NaiveDate> {
        self.today
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenarios.contains_key(name)
    }

    pub fn get(&self, name: &str) -> EngineResult<&Dynamics> {
        self.entry(name).map(|e| &e.dynamics)
    }

    pub fn branch(&self, name: &str) -> EngineResult<Option<&Branch>> {
        self.entry(name).map(|e| e.branch.as_ref())
    }

    /// Build `Baseline` from the provider's records: one timeline over the
    /// fetched window, segmented and fitted.
    pub fn build(
        &mut self,
        provider: &dyn DataProvider,
        geo: &str,
        model: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> EngineResult<Vec<Estimation>> {
        if self.scenarios.contains_key(BASELINE) {
            return Err(EngineError::DuplicateScenario(BASELINE.to_string()));
        }
        self.config.validate()?;
        let model = self.models.get(model)?;
        let observed = provider.fetch(geo, range)?;

        let mut dynamics = Dynamics::new(model, observed.first_date(), observed.last_date())?;
        dynamics.register(&observed)?;
        let estimations = dynamics.segment(&observed, None, &self.config, SegmentMode::Protect)?;

        info!(
            geo,
            model = dynamics.model().name(),
            phases = dynamics.len(),
            today = %observed.last_date(),
            "baseline built"
        );
        self.today = Some(observed.last_date());
        self.scenarios.insert(
            BASELINE.to_string(),
            ScenarioEntry {
                dynamics,
                branch: None,
            },
        );
        Ok(estimations)
    }

    /// Branch `source` into `new_name`.
    ///
    /// The new timeline keeps `source`'s phases up to today and takes
    /// `template`'s (default: Baseline) phases after it.
    pub fn clone_scenario(&mut self, source: &str, new_name: &str, template: Option<&str>) -> EngineResult<()> {
        if self.scenarios.contains_key(new_name) {
            return Err(EngineError::DuplicateScenario(new_name.to_string()));
        }
        let template = template.unwrap_or(BASELINE);
        let parent = &self.entry(source)?.dynamics;
        let date = self.today.map_or(parent.last_date(), |t| t.min(parent.last_date()));
        let dynamics = if template == source {
            parent.clone()
        } else {
            parent.spliced(&self.entry(template)?.dynamics, date)?
        };

        info!(source, scenario = new_name, template, date = %date, "scenario cloned");
        self.scenarios.insert(
            new_name.to_string(),
            ScenarioEntry {
                dynamics,
                branch: Some(Branch {
                    parent: source.to_string(),
                    date,
                }),
            },
        );
        Ok(())
    }

    /// Apply `edit` to a copy of the scenario's timeline and keep the result
    /// only if it succeeds and every branch invariant involving the scenario
    /// still holds.
    pub fn edit_with<F>(&mut self, name: &str, edit: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Dynamics) -> EngineResult<()>,
    {
        let entry = self.entry(name)?;
        let mut dynamics = entry.dynamics.clone();
        edit(&mut dynamics)?;

        if let Some(branch) = &entry.branch {
            let parent = self.entry(&branch.parent)?;
            check_branch(&parent.dynamics, &dynamics, branch.date).map_err(|e| {
                EngineError::consistency(format!("{name} must keep {}'s phases up to {}: {e}", branch.parent, branch.date))
            })?;
        }
        for (child, entry) in &self.scenarios {
            if let Some(branch) = entry.branch.as_ref().filter(|b| b.parent == name) {
                check_branch(&dynamics, &entry.dynamics, branch.date).map_err(|e| {
                    EngineError::consistency(format!("{child} shares {name}'s phases up to {}: {e}", branch.date))
                })?;
            }
        }

        if let Some(entry) = self.scenarios.get_mut(name) {
            entry.dynamics = dynamics;
        }
        debug!(scenario = name, "scenario updated");
        Ok(())
    }

    /// Extend a scenario to `end` with explicit values or the last phase's.
    pub fn append(&mut self, name: &str, end: NaiveDate, params: Option<ParamVector>) -> EngineResult<()> {
        self.edit_with(name, |d| d.append(end, params))?;
        info!(scenario = name, end = %end, "phase appended");
        Ok(())
    }

    pub fn set_parameters(&mut self, name: &str, phase: &str, values: ParamVector) -> EngineResult<()> {
        self.edit_with(name, |d| d.set_parameters(phase, values))
    }

    pub fn edit(&mut self, name: &str, date: NaiveDate, action: EditAction) -> EngineResult<()> {
        self.edit_with(name, |d| d.edit(date, action))
    }

    pub fn delete_last(&mut self, name: &str) -> EngineResult<()> {
        self.edit_with(name, Dynamics::delete_last)
    }

    /// Append `horizon` days of Predicted phases.
    ///
    /// The predictor sees the parameter values of every phase that has them,
    /// oldest first, and must return one in-bounds vector per future day.
    /// Runs of equal vectors become one phase each.
    pub fn predict(&mut self, name: &str, horizon: usize, predictor: &dyn Predictor) -> EngineResult<()> {
        let dynamics = self.get(name)?;
        if horizon == 0 {
            return Err(EngineError::invalid_parameter("prediction horizon must be >= 1 day"));
        }
        let model = dynamics.model().clone();
        let history: Vec<ParamVector> = dynamics.phases().iter().filter_map(|p| p.params.clone()).collect();
        let predicted = predictor.predict(model.as_ref(), &history, horizon)?;
        if predicted.len() != horizon {
            return Err(EngineError::Predictor(format!(
                "{} returned {} days for a {horizon}-day horizon",
                predictor.name(),
                predicted.len()
            )));
        }
        for values in &predicted {
            check_parameters(model.as_ref(), values)
                .map_err(|e| EngineError::Predictor(format!("{}: {e}", predictor.name())))?;
        }

        let runs = compress_runs(predicted);
        let phases = runs.len();
        self.edit_with(name, |d| {
            for (days, values) in runs {
                let end = d.last_date() + Duration::days(days as i64);
                d.append_predicted(end, values)?;
            }
            Ok(())
        })?;
        info!(scenario = name, predictor = predictor.name(), horizon, phases, "prediction appended");
        Ok(())
    }

    /// Canonical (S, I, F, R) simulation of the whole timeline.
    pub fn simulate(&self, name: &str) -> EngineResult<Trajectory> {
        self.get(name)?.simulate(&self.config.simulator)
    }

    pub fn summary(&self, name: &str) -> EngineResult<Vec<PhaseSummary>> {
        self.get(name).map(Dynamics::summary)
    }

    /// Compare scenarios side by side. Every name must exist.
    pub fn compare(&self, metric: &CompareMetric, names: &[&str]) -> EngineResult<ComparisonTable> {
        let scenarios = names
            .iter()
            .map(|&name| self.get(name).map(|d| (name, d)))
            .collect::<EngineResult<Vec<_>>>()?;
        compare(metric, &scenarios, &self.config.simulator)
    }

    pub fn describe(&self, names: &[&str]) -> EngineResult<Vec<ScenarioDescription>> {
        for &name in names {
            self.entry(name)?;
        }
        names.iter().map(|&name| self.describe_one(name)).collect()
    }

    pub fn rename(&mut self, old: &str, new: &str) -> EngineResult<()> {
        if self.scenarios.contains_key(new) {
            return Err(EngineError::DuplicateScenario(new.to_string()));
        }
        let entry = self
            .scenarios
            .remove(old)
            .ok_or_else(|| EngineError::UnknownScenario(old.to_string()))?;
        self.scenarios.insert(new.to_string(), entry);
        for entry in self.scenarios.values_mut() {
            if let Some(branch) = entry.branch.as_mut().filter(|b| b.parent == old) {
                branch.parent = new.to_string();
            }
        }
        info!(from = old, to = new, "scenario renamed");
        Ok(())
    }

    /// Remove a scenario that no other scenario was branched from.
    pub fn delete(&mut self, name: &str) -> EngineResult<()> {
        self.entry(name)?;
        if let Some((child, _)) = self
            .scenarios
            .iter()
            .find(|(_, e)| e.branch.as_ref().is_some_and(|b| b.parent == name))
        {
            return Err(EngineError::consistency(format!(
                "{child} is branched from {name}; delete it first"
            )));
        }
        self.scenarios.remove(name);
        info!(scenario = name, "scenario deleted");
        Ok(())
    }

    fn entry(&self, name: &str) -> EngineResult<&ScenarioEntry> {
        self.scenarios
            .get(name)
            .ok_or_else(|| EngineError::UnknownScenario(name.to_string()))
    }

    fn describe_one(&self, name: &str) -> EngineResult<ScenarioDescription> {
        let dynamics = self.get(name)?;
        let trajectory = dynamics.simulate(&self.config.simulator)?;
        let empty = || EngineError::invalid_series(format!("{name} simulated no days"));

        let mut peak: Option<(NaiveDate, f64)> = None;
        for (pos, row) in trajectory.rows.iter().enumerate() {
            let infected = trajectory.sifr_row(pos).map_or(0.0, |v| v.infected);
            if peak.is_none_or(|(_, best)| infected > best) {
                peak = Some((row.date, infected));
            }
        }
        let (max_date, max_infected) = peak.ok_or_else(empty)?;
        let last = trajectory.sifr_row(trajectory.len().saturating_sub(1)).ok_or_else(empty)?;
        let params = dynamics.effective_parameters()?;
        let final_rt = params
            .last()
            .map(|p| dynamics.model().reproduction_number(p))
            .ok_or_else(empty)?;

        Ok(ScenarioDescription {
            name: name.to_string(),
            max_infected,
            max_date,
            final_date: dynamics.last_date(),
            final_confirmed: last.confirmed(),
            final_fatal: last.fatal,
            final_rt,
        })
    }
}

/// Every parent phase ending on or before `date` must appear unchanged at the
/// same index in `child`; a parent phase running across `date` must hold the
/// same values from the same start up to `date`.
fn check_branch(parent: &Dynamics, child: &Dynamics, date: NaiveDate) -> EngineResult<()> {
    for (i, phase) in parent.phases().iter().enumerate() {
        if phase.start > date {
            break;
        }
        let shared = child.phases().get(i);
        let kept = if phase.end <= date {
            shared.is_some_and(|c| c.as_ref() == phase.as_ref())
        } else {
            shared.is_some_and(|c| c.end >= date && same_from_start(c, phase))
        };
        if !kept {
            return Err(EngineError::consistency(format!(
                "phase {}..{} differs on or before {date}",
                phase.start, phase.end
            )));
        }
    }
    Ok(())
}

/// Same start and values, whatever the end date.
fn same_from_start(a: &Phase, b: &Phase) -> bool {
    a.start == b.start
        && a.model.name() == b.model.name()
        && a.params == b.params
        && a.tag == b.tag
        && a.initial_state == b.initial_state
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::{InMemoryProvider, SampleBuilder};
    use crate::domain::{PhaseTag, phase_name};
    use crate::models::{OdeModel, Sir};
    use crate::scenario::predictor::LastValuePredictor;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()
    }

    fn provider() -> InMemoryProvider {
        let series = SampleBuilder::new(Arc::new(Sir), 1_000_000.0)
            .geo("Testland")
            .start(start())
            .days(60)
            .regime(0, vec![0.25, 0.1])
            .regime(30, vec![0.08, 0.1])
            .build()
            .unwrap();
        InMemoryProvider::new().with(series)
    }

    fn registry() -> ScenarioRegistry {
        let mut config = EngineConfig::default();
        config.estimator.restarts = 1;
        config.estimator.max_iterations = 800;
        let mut registry = ScenarioRegistry::new(ModelRegistry::with_builtin(), config);
        registry.build(&provider(), "Testland", "SIR", None).unwrap();
        registry
    }

    struct FixedPredictor(Vec<ParamVector>);

    impl Predictor for FixedPredictor {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, _model: &dyn OdeModel, _history: &[ParamVector], _horizon: usize) -> EngineResult<Vec<ParamVector>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn build_creates_a_fitted_baseline() {
        let mut r = registry();
        assert_eq!(r.names(), vec![BASELINE]);
        assert_eq!(r.today(), Some(start() + Duration::days(59)));
        let baseline = r.get(BASELINE).unwrap();
        assert!(baseline.phases().iter().all(|p| p.tag == PhaseTag::Fitted));
        assert!(matches!(
            r.build(&provider(), "Testland", "SIR", None),
            Err(EngineError::DuplicateScenario(_))
        ));
        let mut empty = ScenarioRegistry::new(ModelRegistry::with_builtin(), EngineConfig::default());
        assert!(matches!(
            empty.build(&provider(), "Nowhere", "SIR", None),
            Err(EngineError::DataUnavailable { .. })
        ));
        assert!(matches!(
            empty.build(&provider(), "Testland", "SEIR", None),
            Err(EngineError::UnknownModel(_))
        ));
    }

    #[test]
    fn clones_share_the_history() {
        let mut r = registry();
        r.clone_scenario(BASELINE, "Lockdown", None).unwrap();
        let parent = r.get(BASELINE).unwrap();
        let child = r.get("Lockdown").unwrap();
        assert_eq!(parent.len(), child.len());
        for (a, b) in parent.phases().iter().zip(child.phases()) {
            assert!(Arc::ptr_eq(a, b));
        }
        assert_eq!(
            r.branch("Lockdown").unwrap(),
            Some(&Branch {
                parent: BASELINE.to_string(),
                date: r.today().unwrap(),
            })
        );
        assert!(matches!(
            r.clone_scenario(BASELINE, "Lockdown", None),
            Err(EngineError::DuplicateScenario(_))
        ));
        assert!(matches!(
            r.clone_scenario("Missing", "Other", None),
            Err(EngineError::UnknownScenario(_))
        ));
    }

    #[test]
    fn scenarios_diverge_only_after_the_branch_date() {
        let mut r = registry();
        r.clone_scenario(BASELINE, "Lockdown", None).unwrap();
        let end = r.today().unwrap() + Duration::days(20);
        r.append("Lockdown", end, Some(vec![0.05, 0.1])).unwrap();
        r.append(BASELINE, end, None).unwrap();

        let before_child = r.get("Lockdown").unwrap().clone();
        let before_parent = r.get(BASELINE).unwrap().clone();
        assert!(matches!(
            r.set_parameters("Lockdown", "0th", vec![0.3, 0.1]),
            Err(EngineError::DynamicsConsistency(_))
        ));
        assert!(matches!(
            r.set_parameters(BASELINE, "0th", vec![0.3, 0.1]),
            Err(EngineError::DynamicsConsistency(_))
        ));
        assert_eq!(r.get("Lockdown").unwrap(), &before_child);
        assert_eq!(r.get(BASELINE).unwrap(), &before_parent);

        let last = r.get("Lockdown").unwrap().len() - 1;
        r.set_parameters("Lockdown", &phase_name(last), vec![0.02, 0.1])
            .unwrap();
    }

    #[test]
    fn edits_across_the_branch_date_keep_the_shared_history() {
        let mut r = registry();
        r.clone_scenario(BASELINE, "Lockdown", None).unwrap();
        let today = r.today().unwrap();
        let end = today + Duration::days(20);
        r.append(BASELINE, end, Some(vec![0.9, 0.1])).unwrap();
        r.append("Lockdown", end, Some(vec![0.05, 0.1])).unwrap();
        let next = today + Duration::days(1);

        let before = r.get(BASELINE).unwrap().clone();
        assert!(matches!(
            r.edit(BASELINE, next, EditAction::MergeRight),
            Err(EngineError::DynamicsConsistency(_))
        ));
        assert_eq!(r.get(BASELINE).unwrap(), &before);
        assert!(matches!(
            r.edit("Lockdown", next, EditAction::MergeRight),
            Err(EngineError::DynamicsConsistency(_))
        ));

        r.edit(BASELINE, next, EditAction::MergeLeft).unwrap();
        let parent = r.get(BASELINE).unwrap();
        let across = parent.phases()[parent.phase_at(today).unwrap()].clone();
        assert_eq!(across.end, end);
        let shared = r.get("Lockdown").unwrap().phases()[parent.phase_at(today).unwrap()].clone();
        assert_eq!(across.params, shared.params);
    }

    #[test]
    fn predict_appends_the_horizon() {
        let mut r = registry();
        let last = r.get(BASELINE).unwrap().last_date();
        r.predict(BASELINE, 30, &LastValuePredictor).unwrap();
        let d = r.get(BASELINE).unwrap();
        assert_eq!(d.last_date(), last + Duration::days(30));
        assert_eq!(d.last_phase().tag, PhaseTag::Predicted);
        d.validate().unwrap();

        assert!(matches!(
            r.predict("Missing", 30, &LastValuePredictor),
            Err(EngineError::UnknownScenario(_))
        ));
    }

    #[test]
    fn predictor_contract_is_enforced() {
        let mut r = registry();
        let before = r.get(BASELINE).unwrap().clone();
        let short = FixedPredictor(vec![vec![0.1, 0.1]; 3]);
        assert!(matches!(r.predict(BASELINE, 5, &short), Err(EngineError::Predictor(_))));
        let out_of_bounds = FixedPredictor(vec![vec![1.5, 0.1]; 5]);
        assert!(matches!(r.predict(BASELINE, 5, &out_of_bounds), Err(EngineError::Predictor(_))));
        assert_eq!(r.get(BASELINE).unwrap(), &before);

        let two_runs = FixedPredictor(vec![vec![0.1, 0.1], vec![0.1, 0.1], vec![0.2, 0.1]]);
        let phases = before.len();
        r.predict(BASELINE, 3, &two_runs).unwrap();
        assert_eq!(r.get(BASELINE).unwrap().len(), phases + 2);
    }

    #[test]
    fn compare_requires_every_scenario() {
        let mut r = registry();
        r.clone_scenario(BASELINE, "Lockdown", None).unwrap();
        let end = r.today().unwrap() + Duration::days(10);
        r.append(BASELINE, end, None).unwrap();
        r.append("Lockdown", end, Some(vec![0.02, 0.1])).unwrap();

        let table = r.compare(&CompareMetric::Rt, &[BASELINE, "Lockdown"]).unwrap();
        let last = table.rows.last().unwrap();
        assert!((last.values[1].unwrap() - 0.2).abs() < 1e-12);
        assert!(matches!(
            r.compare(&CompareMetric::Rt, &[BASELINE, "Missing"]),
            Err(EngineError::UnknownScenario(_))
        ));

        let described = r.describe(&[BASELINE, "Lockdown"]).unwrap();
        assert!(described[1].final_confirmed < described[0].final_confirmed);
        assert!((described[1].final_rt - 0.2).abs() < 1e-12);
    }

    #[test]
    fn rename_and_delete_follow_branches() {
        let mut r = registry();
        r.clone_scenario(BASELINE, "Lockdown", None).unwrap();
        r.clone_scenario("Lockdown", "Strict", Some("Lockdown")).unwrap();
        r.rename("Lockdown", "Measures").unwrap();
        assert_eq!(r.branch("Strict").unwrap().unwrap().parent, "Measures");
        assert!(matches!(r.rename("Strict", BASELINE), Err(EngineError::DuplicateScenario(_))));

        assert!(matches!(r.delete("Measures"), Err(EngineError::DynamicsConsistency(_))));
        r.delete("Strict").unwrap();
        r.delete("Measures").unwrap();
        assert_eq!(r.names(), vec![BASELINE]);
        assert!(matches!(r.delete("Measures"), Err(EngineError::UnknownScenario(_))));
    }
}
