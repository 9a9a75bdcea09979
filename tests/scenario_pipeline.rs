//! End-to-end behavior of the scenario engine on synthetic outbreaks.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use phase_sir::data::{DataProvider, InMemoryProvider, SampleBuilder};
use phase_sir::domain::{EngineConfig, ObservedSeries, PhaseTag};
use phase_sir::dynamics::{Dynamics, EditAction};
use phase_sir::error::EngineError;
use phase_sir::models::{ModelRegistry, Sir, Sirf};
use phase_sir::scenario::{BASELINE, CompareMetric, LastValuePredictor, LinearTrendPredictor, ScenarioRegistry};

const GEO: &str = "Synthetic";

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 3, 1).unwrap() + Duration::days(offset)
}

/// 120 days of SIR-F records with one contact-rate change on day 60.
fn outbreak() -> ObservedSeries {
    noisy_outbreak(0.0, 0)
}

fn noisy_outbreak(noise: f64, seed: u64) -> ObservedSeries {
    SampleBuilder::new(Arc::new(Sirf), 10_000_000.0)
        .geo(GEO)
        .start(day(0))
        .days(120)
        .initial_infected(500.0)
        .regime(0, vec![0.002, 0.005, 0.2, 0.075])
        .regime(60, vec![0.002, 0.005, 0.05, 0.075])
        .noise(noise)
        .seed(seed)
        .build()
        .unwrap()
}

fn baseline() -> (ScenarioRegistry, ObservedSeries) {
    baseline_of(outbreak())
}

fn baseline_of(observed: ObservedSeries) -> (ScenarioRegistry, ObservedSeries) {
    let provider = InMemoryProvider::new().with(observed.clone());
    let mut registry = ScenarioRegistry::new(ModelRegistry::with_builtin(), EngineConfig::default());
    registry.build(&provider, GEO, "SIR-F", None).unwrap();
    (registry, observed)
}

#[test]
fn baseline_finds_the_regime_change_and_reproduces_the_records() {
    let (registry, observed) = baseline();
    let dynamics = registry.get(BASELINE).unwrap();

    let change_points = dynamics.change_points();
    assert_eq!(change_points.len(), 1, "{change_points:?}");
    let offset = (change_points[0] - day(60)).num_days();
    assert!(offset.abs() <= 3, "boundary {offset} days from the true change");

    let before = dynamics.phases()[0].params.clone().unwrap();
    let after = dynamics.phases()[1].params.clone().unwrap();
    assert_ne!(before, after);
    assert!(after[2] < before[2], "contact rate must drop: {before:?} -> {after:?}");

    let simulated = registry.simulate(BASELINE).unwrap();
    assert_eq!(simulated.len(), observed.len());
    for (pos, record) in observed.records().iter().enumerate() {
        let sim = simulated.sifr_row(pos).unwrap();
        let obs = observed.sifr_of(record);
        let confirmed = (sim.confirmed() - obs.confirmed()).abs() / obs.confirmed().max(1.0);
        let infected = (sim.infected - obs.infected).abs() / obs.infected.max(1.0);
        assert!(confirmed < 0.1, "{}: confirmed off by {confirmed}", record.date);
        assert!(infected < 0.2, "{}: infected off by {infected}", record.date);
    }
}

#[test]
fn noisy_records_still_give_one_regime_change() {
    let (registry, _) = baseline_of(noisy_outbreak(0.01, 3));
    let dynamics = registry.get(BASELINE).unwrap();
    let change_points = dynamics.change_points();
    assert_eq!(change_points.len(), 1, "{change_points:?}");
    let offset = (change_points[0] - day(60)).num_days();
    assert!(offset.abs() <= 5, "boundary {offset} days from the true change");
    assert!(dynamics.phases().iter().all(|p| p.tag == PhaseTag::Fitted));
}

#[test]
fn simulation_is_deterministic_and_non_negative() {
    let (registry, _) = baseline();
    let a = registry.simulate(BASELINE).unwrap();
    let b = registry.simulate(BASELINE).unwrap();
    assert_eq!(a, b);
    assert!(a.rows.iter().all(|r| r.values.iter().all(|v| *v >= 0.0)));
}

#[test]
fn append_without_values_copies_the_last_phase() {
    let (mut registry, _) = baseline();
    let last = registry.get(BASELINE).unwrap().last_phase().clone();
    let end = last.end + Duration::days(20);
    registry.append(BASELINE, end, None).unwrap();

    let appended = registry.get(BASELINE).unwrap().last_phase().clone();
    assert_eq!(appended.start, last.end + Duration::days(1));
    assert_eq!(appended.end, end);
    assert_eq!(appended.params, last.params);
}

#[test]
fn predict_covers_the_horizon() {
    let (mut registry, observed) = baseline();
    let phases = registry.get(BASELINE).unwrap().len();
    registry.predict(BASELINE, 30, &LinearTrendPredictor::default()).unwrap();

    let dynamics = registry.get(BASELINE).unwrap();
    dynamics.validate().unwrap();
    assert_eq!(dynamics.last_date(), observed.last_date() + Duration::days(30));
    let predicted = &dynamics.phases()[phases..];
    assert!(!predicted.is_empty());
    assert_eq!(predicted[0].start, observed.last_date() + Duration::days(1));
    assert!(predicted.iter().all(|p| p.tag == PhaseTag::Predicted));
    let days: i64 = predicted.iter().map(|p| p.days()).sum();
    assert_eq!(days, 30);

    assert!(matches!(
        registry.predict("Missing", 30, &LastValuePredictor),
        Err(EngineError::UnknownScenario(name)) if name == "Missing"
    ));
}

#[test]
fn branches_share_history_and_diverge_after_today() {
    let (mut registry, observed) = baseline();
    registry.clone_scenario(BASELINE, "Lockdown", None).unwrap();
    let end = observed.last_date() + Duration::days(30);
    registry.append(BASELINE, end, None).unwrap();
    let mut lockdown = registry.get(BASELINE).unwrap().last_phase().params.clone().unwrap();
    lockdown[2] = 0.01;
    registry.append("Lockdown", end, Some(lockdown)).unwrap();

    let today = registry.today().unwrap();
    let parent = registry.get(BASELINE).unwrap();
    let child = registry.get("Lockdown").unwrap();
    for (a, b) in parent.phases().iter().zip(child.phases()).filter(|(a, _)| a.end <= today) {
        assert_eq!(a, b);
    }

    let edited = registry.get("Lockdown").unwrap().clone();
    let err = registry.edit("Lockdown", day(30), EditAction::Split).unwrap_err();
    assert!(matches!(err, EngineError::DynamicsConsistency(_)));
    assert_eq!(registry.get("Lockdown").unwrap(), &edited);

    let table = registry
        .compare(&CompareMetric::Variable("Infected".to_string()), &[BASELINE, "Lockdown"])
        .unwrap();
    let same = table.row(today).unwrap();
    assert_eq!(same.values[0], same.values[1]);
    let last = table.rows.last().unwrap();
    assert!(last.values[1].unwrap() < last.values[0].unwrap());

    assert!(matches!(
        registry.compare(&CompareMetric::Rt, &[BASELINE, "Nowhere"]),
        Err(EngineError::UnknownScenario(_))
    ));
}

#[test]
fn parent_edits_cannot_rewrite_the_shared_history() {
    let (mut registry, observed) = baseline();
    registry.clone_scenario(BASELINE, "Lockdown", None).unwrap();
    let today = registry.today().unwrap();
    let end = observed.last_date() + Duration::days(30);
    let mut surge = registry.get(BASELINE).unwrap().last_phase().params.clone().unwrap();
    surge[2] = 0.9;
    registry.append(BASELINE, end, Some(surge)).unwrap();

    let before = registry.get(BASELINE).unwrap().clone();
    let err = registry
        .edit(BASELINE, today + Duration::days(1), EditAction::MergeRight)
        .unwrap_err();
    assert!(matches!(err, EngineError::DynamicsConsistency(_)));
    assert_eq!(registry.get(BASELINE).unwrap(), &before);

    let table = registry
        .compare(&CompareMetric::Parameter("rho".to_string()), &[BASELINE, "Lockdown"])
        .unwrap();
    for row in table.rows.iter().filter(|r| r.date <= today) {
        assert_eq!(row.values[0], row.values[1], "{}", row.date);
    }
}

#[test]
fn failed_edits_leave_the_timeline_untouched() {
    let mut dynamics = Dynamics::new(Arc::new(Sir), day(0), day(59)).unwrap();
    dynamics.segment_at(&[day(20), day(40)], false).unwrap();
    dynamics.set_parameters("0th", vec![0.2, 0.1]).unwrap();

    let steps: Vec<Box<dyn Fn(&mut Dynamics) -> Result<(), EngineError>>> = vec![
        Box::new(|d: &mut Dynamics| d.edit(day(30), EditAction::Split)),
        Box::new(|d: &mut Dynamics| d.edit(day(30), EditAction::Split)),
        Box::new(|d: &mut Dynamics| d.edit(day(20), EditAction::MergeLeft)),
        Box::new(|d: &mut Dynamics| d.edit(day(0), EditAction::MergeRight)),
        Box::new(|d: &mut Dynamics| d.append(day(50), None)),
        Box::new(|d: &mut Dynamics| d.append(day(80), None)),
        Box::new(|d: &mut Dynamics| d.segment_at(&[day(79)], false)),
        Box::new(|d: &mut Dynamics| d.set_parameters("9th", vec![0.1, 0.1])),
        Box::new(|d: &mut Dynamics| d.set_parameters("1st", vec![1.5, 0.1])),
        Box::new(|d: &mut Dynamics| d.edit(day(40), EditAction::MergeRight)),
        Box::new(|d: &mut Dynamics| d.delete_last()),
    ];
    for step in &steps {
        let before = dynamics.clone();
        if step(&mut dynamics).is_err() {
            assert_eq!(dynamics, before);
        }
        dynamics.validate().unwrap();
        for pair in dynamics.phases().windows(2) {
            assert_eq!(pair[0].end + Duration::days(1), pair[1].start);
        }
    }
}

#[test]
fn provider_errors_pass_through_unchanged() {
    let provider = InMemoryProvider::new().with(outbreak());
    let err = provider.fetch(GEO, Some((day(-5), day(10)))).unwrap_err();
    let mut registry = ScenarioRegistry::new(ModelRegistry::with_builtin(), EngineConfig::default());
    assert_eq!(
        registry.build(&provider, GEO, "SIR-F", Some((day(-5), day(10)))).unwrap_err(),
        err
    );
    assert!(registry.names().is_empty());
}
