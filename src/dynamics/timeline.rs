//! The phase timeline of one scenario.
//!
//! Invariants (checked after every mutation, before it is committed):
//! - at least one phase
//! - `phases[i].end + 1 day == phases[i + 1].start` (contiguous, no overlap)
//! - every phase uses the timeline's model and carries in-bounds parameters
//!
//! Mutations build a new phase list and only replace the current one once the
//! whole list validates, so a failing call leaves the timeline untouched.
//! Phases that an operation does not touch keep their `Arc`, which is how
//! cloned timelines share history.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    EngineConfig, EstimatorConfig, FitQuality, ObservedSeries, ParamVector, PhaseTag, SegmenterConfig,
    SimulatorConfig, Trajectory, TrajectoryRow, phase_name,
};
use crate::dynamics::phase::Phase;
use crate::error::{EngineError, EngineResult};
use crate::fit::{Estimation, estimate};
use crate::models::{OdeModel, ParameterBounds, day_parameters};
use crate::segment::{Segmentation, detect};
use crate::sim::simulator::{check_initial_state, integrate};

/// Boundary edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EditAction {
    /// Start a new phase on the date; both halves keep the parameters.
    Split,
    /// Remove the boundary starting on the date; the merged phase keeps the
    /// left (earlier) phase's parameters.
    MergeLeft,
    /// Remove the boundary starting on the date; the merged phase keeps the
    /// right (later) phase's parameters.
    MergeRight,
}

/// What `segment` may do with phases whose parameters were set by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMode {
    /// Refuse to replace Simulated / Predicted phases.
    #[default]
    Protect,
    /// Replace them.
    Overwrite,
}

/// One row of [`Dynamics::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub population: Option<f64>,
    pub ode: String,
    pub rt: Option<f64>,
    pub params: Vec<(String, Option<f64>)>,
    pub day_params: Vec<(String, Option<f64>)>,
    pub tag: PhaseTag,
    pub score: Option<f64>,
    pub quality: Option<FitQuality>,
}

#[derive(Debug, Clone)]
pub struct Dynamics {
    model: Arc<dyn OdeModel>,
    phases: Vec<Arc<Phase>>,
    observed: Option<Arc<ObservedSeries>>,
}

impl PartialEq for Dynamics {
    fn eq(&self, other: &Self) -> bool {
        self.model.name() == other.model.name()
            && self.phases == other.phases
            && self.observed == other.observed
    }
}

impl Dynamics {
    /// One Past phase over `first..=last`.
    pub fn new(model: Arc<dyn OdeModel>, first: NaiveDate, last: NaiveDate) -> EngineResult<Self> {
        let phase = Phase::new(Arc::clone(&model), first, last)?;
        Ok(Self {
            model,
            phases: vec![Arc::new(phase)],
            observed: None,
        })
    }

    pub fn model(&self) -> &Arc<dyn OdeModel> {
        &self.model
    }

    pub fn phases(&self) -> &[Arc<Phase>] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.phases[0].start
    }

    pub fn last_date(&self) -> NaiveDate {
        self.phases[self.phases.len() - 1].end
    }

    pub fn last_phase(&self) -> &Phase {
        &self.phases[self.phases.len() - 1]
    }

    pub fn observed(&self) -> Option<&ObservedSeries> {
        self.observed.as_deref()
    }

    /// Phase by ordinal name (`"0th"`, `"1st"`, ...).
    pub fn phase_index(&self, name: &str) -> EngineResult<usize> {
        (0..self.phases.len())
            .find(|&i| phase_name(i) == name)
            .ok_or_else(|| EngineError::UnknownPhase(name.to_string()))
    }

    pub fn phase(&self, name: &str) -> EngineResult<&Phase> {
        self.phase_index(name).map(|i| self.phases[i].as_ref())
    }

    /// Index of the phase containing `date`.
    pub fn phase_at(&self, date: NaiveDate) -> Option<usize> {
        self.phases.iter().position(|p| p.contains(date))
    }

    /// Start dates of every phase but the first.
    pub fn change_points(&self) -> Vec<NaiveDate> {
        self.phases[1..].iter().map(|p| p.start).collect()
    }

    /// Check the timeline invariants.
    pub fn validate(&self) -> EngineResult<()> {
        validate_phases(self.model.as_ref(), &self.phases)
    }

    /// Register observed records: they provide the initial state of each
    /// covered phase start. The first date must be covered.
    pub fn register(&mut self, observed: &ObservedSeries) -> EngineResult<()> {
        if observed.at(self.first_date()).is_none() {
            return Err(EngineError::invalid_series(format!(
                "records of '{}' must cover the first date {}",
                observed.geo(),
                self.first_date()
            )));
        }
        let observed = Arc::new(observed.clone());
        let phases = self
            .phases
            .iter()
            .map(|p| {
                let state = observed.at(p.start).map(|v| self.model.to_state(&v));
                if p.initial_state == state {
                    Arc::clone(p)
                } else {
                    let mut phase = Phase::clone(p);
                    phase.initial_state = state;
                    Arc::new(phase)
                }
            })
            .collect();
        self.commit(phases)?;
        self.observed = Some(observed);
        Ok(())
    }

    /// Segment at explicit change dates.
    ///
    /// Points must lie in `first..=last - 2 days` and be unique; the first
    /// date is accepted and ignored. With `overwrite`, existing boundaries are
    /// dropped first. New phases take the parameters of the phase their start
    /// date fell in.
    pub fn segment_at(&mut self, points: &[NaiveDate], overwrite: bool) -> EngineResult<()> {
        let (first, last) = (self.first_date(), self.last_date());
        let latest = last - Duration::days(2);
        let mut starts: Vec<NaiveDate> = Vec::with_capacity(points.len() + self.phases.len());
        for (i, &p) in points.iter().enumerate() {
            if p < first || p > latest {
                return Err(EngineError::consistency(format!(
                    "change point {p} must lie in {first}..={latest}"
                )));
            }
            if points[..i].contains(&p) {
                return Err(EngineError::consistency(format!("duplicate change point {p}")));
            }
        }
        if !overwrite {
            starts.extend(self.change_points());
        }
        starts.extend(points.iter().copied().filter(|&p| p > first));
        starts.sort();
        starts.dedup();

        let phases = self.rebuild(&starts)?;
        self.commit(phases)
    }

    /// Run change-point detection without touching the timeline.
    ///
    /// The search covers the part of the timeline the records cover.
    pub fn detect(&self, observed: &ObservedSeries, config: &SegmenterConfig) -> EngineResult<Segmentation> {
        let (start, end) = self.observed_span(observed)?;
        detect(observed, start, end, config)
    }

    /// Re-derive phases over `range` (default: the observed part of the
    /// timeline) from the records, estimating each new phase.
    ///
    /// Phases overlapping the range are replaced; a phase straddling an edge
    /// of the range keeps its part outside. Simulated / Predicted phases in
    /// the range are only replaced with [`SegmentMode::Overwrite`].
    pub fn segment(
        &mut self,
        observed: &ObservedSeries,
        range: Option<(NaiveDate, NaiveDate)>,
        config: &EngineConfig,
        mode: SegmentMode,
    ) -> EngineResult<Vec<Estimation>> {
        let (start, end) = match range {
            Some((start, end)) => {
                EngineError::check_range(start, end)?;
                if start < self.first_date() || end > self.last_date() {
                    return Err(EngineError::consistency(format!(
                        "range {start}..{end} exceeds the timeline {}..{}",
                        self.first_date(),
                        self.last_date()
                    )));
                }
                if !observed.covers(start, end) {
                    return Err(EngineError::invalid_series(format!(
                        "records of '{}' do not cover {start}..{end}",
                        observed.geo()
                    )));
                }
                (start, end)
            }
            None => self.observed_span(observed)?,
        };

        if mode == SegmentMode::Protect {
            if let Some(p) = self
                .phases
                .iter()
                .find(|p| p.overlaps(start, end) && p.tag.is_manual())
            {
                return Err(EngineError::consistency(format!(
                    "{} phase {}..{} would be replaced; use overwrite mode",
                    p.tag.label(),
                    p.start,
                    p.end
                )));
            }
        }

        let segmentation = detect(observed, start, end, &config.segmenter)?;
        let bounds = ParameterBounds::resolve(self.model.as_ref(), &config.estimator.bounds)?;

        let mut phases: Vec<Arc<Phase>> = Vec::with_capacity(self.phases.len() + segmentation.change_points.len());
        for p in &self.phases {
            if p.end < start {
                phases.push(Arc::clone(p));
            } else if p.start < start {
                phases.push(Arc::new(p.resized(p.start, start - Duration::days(1))?));
            }
        }

        let mut previous = phases.last().and_then(|p| p.params.clone());
        let mut estimations = Vec::with_capacity(segmentation.change_points.len() + 1);
        for (s, e) in segmentation.phase_ranges() {
            let index = phases.len();
            let window = observed.window(s, e)?;
            let initial = self.model.to_state(&window[0]);
            let est = estimate(
                self.model.as_ref(),
                &window,
                &initial,
                &bounds,
                previous.as_deref(),
                &config.estimator,
                &config.simulator,
            )?;
            log_estimation(&phase_name(index), &est);

            let mut phase = Phase::new(Arc::clone(&self.model), s, e)?.with_params(est.params.clone(), PhaseTag::Fitted)?;
            phase.initial_state = Some(initial);
            phase.quality = Some(est.quality.clone());
            previous = Some(est.params.clone());
            phases.push(Arc::new(phase));
            estimations.push(est);
        }

        for p in &self.phases {
            if p.start > end {
                phases.push(Arc::clone(p));
            } else if p.end > end {
                let mut tail = p.resized(end + Duration::days(1), p.end)?;
                tail.initial_state = observed
                    .at(tail.start)
                    .map(|v| self.model.to_state(&v));
                phases.push(Arc::new(tail));
            }
        }

        self.commit(phases)?;
        self.observed = Some(Arc::new(observed.clone()));
        info!(
            geo = observed.geo(),
            start = %start,
            end = %end,
            phases = self.phases.len(),
            "timeline segmented"
        );
        Ok(estimations)
    }

    /// Estimate every Past / Fitted phase covered by the registered records,
    /// in order, seeding each from the previous phase's values.
    ///
    /// One-day phases carry no trend to fit; they are left as they are and
    /// inherit the previous phase's values when simulated.
    pub fn estimate(&mut self, estimator: &EstimatorConfig, simulator: &SimulatorConfig) -> EngineResult<Vec<(String, Estimation)>> {
        let observed = self
            .observed
            .clone()
            .ok_or_else(|| EngineError::invalid_series("no records registered"))?;
        let bounds = ParameterBounds::resolve(self.model.as_ref(), &estimator.bounds)?;

        let mut phases = self.phases.clone();
        let mut out = Vec::new();
        let mut previous: Option<ParamVector> = None;
        for (i, slot) in phases.iter_mut().enumerate() {
            let fit = matches!(slot.tag, PhaseTag::Past | PhaseTag::Fitted)
                && observed.covers(slot.start, slot.end);
            if fit && slot.days() < 2 {
                debug!(phase = %phase_name(i), date = %slot.start, "one-day phase left unfit");
            } else if fit {
                let window = observed.window(slot.start, slot.end)?;
                let initial = self.model.to_state(&window[0]);
                let est = estimate(
                    self.model.as_ref(),
                    &window,
                    &initial,
                    &bounds,
                    previous.as_deref(),
                    estimator,
                    simulator,
                )?;
                let name = phase_name(i);
                log_estimation(&name, &est);

                let phase = Arc::make_mut(slot);
                phase.params = Some(est.params.clone());
                phase.tag = PhaseTag::Fitted;
                phase.initial_state = Some(initial);
                phase.quality = Some(est.quality.clone());
                out.push((name, est));
            }
            if slot.params.is_some() {
                previous = slot.params.clone();
            }
        }
        self.commit(phases)?;
        Ok(out)
    }

    /// Set a phase's parameters by hand; the phase becomes Simulated.
    pub fn set_parameters(&mut self, phase: &str, values: ParamVector) -> EngineResult<()> {
        let index = self.phase_index(phase)?;
        let mut phases = self.phases.clone();
        let updated = Phase::clone(&phases[index]).with_params(values, PhaseTag::Simulated)?;
        phases[index] = Arc::new(updated);
        self.commit(phases)
    }

    /// Add a phase `last + 1 ..= end`.
    ///
    /// Without explicit values, the new phase copies the last phase's
    /// parameters (and stays Past if the last phase has none).
    pub fn append(&mut self, end: NaiveDate, params: Option<ParamVector>) -> EngineResult<()> {
        match params {
            Some(values) => self.push_phase(end, Some(values), PhaseTag::Simulated),
            None => {
                let inherited = self.last_phase().params.clone();
                let tag = if inherited.is_some() { PhaseTag::Simulated } else { PhaseTag::Past };
                self.push_phase(end, inherited, tag)
            }
        }
    }

    /// Append a phase produced by a predictor.
    pub fn append_predicted(&mut self, end: NaiveDate, params: ParamVector) -> EngineResult<()> {
        self.push_phase(end, Some(params), PhaseTag::Predicted)
    }

    fn push_phase(&mut self, end: NaiveDate, params: Option<ParamVector>, tag: PhaseTag) -> EngineResult<()> {
        let start = self.last_date() + Duration::days(1);
        if end < start {
            return Err(EngineError::consistency(format!(
                "new phase must end after {}, got {end}",
                self.last_date()
            )));
        }
        let mut phase = Phase::new(Arc::clone(&self.model), start, end)?;
        if let Some(values) = params {
            phase = phase.with_params(values, tag)?;
        }
        phase.initial_state = self.observed_state(start);
        let mut phases = self.phases.clone();
        phases.push(Arc::new(phase));
        self.commit(phases)
    }

    /// Split or merge at a boundary date.
    pub fn edit(&mut self, date: NaiveDate, action: EditAction) -> EngineResult<()> {
        let index = self.phase_at(date).ok_or_else(|| {
            EngineError::consistency(format!(
                "{date} is outside the timeline {}..{}",
                self.first_date(),
                self.last_date()
            ))
        })?;
        let mut phases = self.phases.clone();
        let current = Arc::clone(&phases[index]);

        match action {
            EditAction::Split => {
                if current.start == date {
                    return Err(EngineError::consistency(format!("{date} is already a phase start")));
                }
                let mut right = current.resized(date, current.end)?;
                right.initial_state = self.observed_state(date);
                let left = current.resized(current.start, date - Duration::days(1))?;
                phases.splice(index..=index, [Arc::new(left), Arc::new(right)]);
            }
            EditAction::MergeLeft | EditAction::MergeRight => {
                if current.start != date || index == 0 {
                    return Err(EngineError::consistency(format!(
                        "{date} is not a boundary between two phases"
                    )));
                }
                let left = Arc::clone(&phases[index - 1]);
                let merged = if action == EditAction::MergeLeft {
                    left.resized(left.start, current.end)?
                } else {
                    let mut m = current.resized(left.start, current.end)?;
                    m.initial_state = left.initial_state.clone();
                    m
                };
                phases.splice(index - 1..=index, [Arc::new(merged)]);
            }
        }
        self.commit(phases)?;
        debug!(date = %date, ?action, phases = self.phases.len(), "timeline edited");
        Ok(())
    }

    /// Remove the last phase. The only phase cannot be removed.
    pub fn delete_last(&mut self) -> EngineResult<()> {
        if self.phases.len() <= 1 {
            return Err(EngineError::consistency("cannot delete the only phase"));
        }
        let mut phases = self.phases.clone();
        phases.pop();
        self.commit(phases)
    }

    /// Timeline made of this timeline's phases up to `date` followed by
    /// `other`'s phases after `date`. Phases straddling `date` are cut.
    pub fn spliced(&self, other: &Dynamics, date: NaiveDate) -> EngineResult<Dynamics> {
        if self.model.name() != other.model.name() {
            return Err(EngineError::consistency(format!(
                "cannot combine {} and {} timelines",
                self.model.name(),
                other.model.name()
            )));
        }
        if date < self.first_date() {
            return Err(EngineError::consistency(format!(
                "branch date {date} precedes the timeline start {}",
                self.first_date()
            )));
        }
        if date > self.last_date() {
            return Err(EngineError::consistency(format!(
                "branch date {date} is after the timeline end {}",
                self.last_date()
            )));
        }
        let mut phases = Vec::with_capacity(self.phases.len() + other.phases.len());
        for p in &self.phases {
            if p.end <= date {
                phases.push(Arc::clone(p));
            } else if p.start <= date {
                phases.push(Arc::new(p.resized(p.start, date)?));
            }
        }
        let next = date + Duration::days(1);
        for p in &other.phases {
            if p.start >= next {
                phases.push(Arc::clone(p));
            } else if p.end >= next {
                phases.push(Arc::new(p.resized(next, p.end)?));
            }
        }
        let mut out = Dynamics {
            model: Arc::clone(&self.model),
            phases: Vec::new(),
            observed: self.observed.clone(),
        };
        out.commit(phases)?;
        Ok(out)
    }

    /// Parameter values of every phase, forward-filled from earlier phases.
    pub fn effective_parameters(&self) -> EngineResult<Vec<ParamVector>> {
        let mut out: Vec<ParamVector> = Vec::with_capacity(self.phases.len());
        for (i, p) in self.phases.iter().enumerate() {
            let values = match &p.params {
                Some(values) => values.clone(),
                None => out
                    .last()
                    .cloned()
                    .ok_or_else(|| EngineError::MissingParameters(phase_name(i)))?,
            };
            out.push(values);
        }
        Ok(out)
    }

    /// Tabular description of every phase.
    pub fn summary(&self) -> Vec<PhaseSummary> {
        let names = self.model.parameter_names();
        self.phases
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let params = match &p.params {
                    Some(values) => names
                        .iter()
                        .zip(values)
                        .map(|(n, v)| (n.to_string(), Some(*v)))
                        .collect(),
                    None => names.iter().map(|n| (n.to_string(), None)).collect(),
                };
                let day_params = match &p.params {
                    Some(values) => day_parameters(self.model.as_ref(), values),
                    None => day_parameters(self.model.as_ref(), &vec![f64::NAN; names.len()])
                        .into_iter()
                        .map(|(n, _)| (n, None))
                        .collect(),
                };
                PhaseSummary {
                    name: phase_name(i),
                    start: p.start,
                    end: p.end,
                    population: p
                        .initial_state
                        .as_ref()
                        .map(|s| s.iter().sum())
                        .or_else(|| self.observed.as_ref().map(|o| o.population())),
                    ode: self.model.name().to_string(),
                    rt: p.rt(),
                    params,
                    day_params,
                    tag: p.tag,
                    score: p.quality.as_ref().map(|q| q.score),
                    quality: p.quality.clone(),
                }
            })
            .collect()
    }

    /// Model-state simulation over the whole timeline, one row per day.
    ///
    /// Each phase starts from the previous phase's state on its start date, so
    /// compartments are continuous across boundaries. Unfit phases inherit the
    /// previous phase's parameters.
    pub fn simulate_states(&self, config: &SimulatorConfig) -> EngineResult<Trajectory> {
        config.validate()?;
        let params = self.effective_parameters()?;
        let mut state = self.phases[0].initial_state.clone().ok_or_else(|| {
            EngineError::invalid_series(format!(
                "no records registered for the first date {}",
                self.first_date()
            ))
        })?;
        check_initial_state(self.model.as_ref(), &state)?;

        let mut rows = Vec::new();
        for (phase, values) in self.phases.iter().zip(&params) {
            let days = usize::try_from(phase.days()).map_err(|_| {
                EngineError::InvalidRange {
                    start: phase.start,
                    end: phase.end,
                }
            })?;
            let mut states = integrate(self.model.as_ref(), &state, values, days, config);
            // The extra row is the next phase's first day.
            state = states.pop().unwrap_or_default();
            rows.extend(states.into_iter().enumerate().map(|(k, values)| TrajectoryRow {
                date: phase.start + Duration::days(k as i64),
                values,
            }));
        }

        Ok(Trajectory {
            model: self.model.name().to_string(),
            variables: self.model.variables().iter().map(|v| v.to_string()).collect(),
            rows,
        })
    }

    /// Canonical (S, I, F, R) simulation over the whole timeline.
    pub fn simulate(&self, config: &SimulatorConfig) -> EngineResult<Trajectory> {
        let states = self.simulate_states(config)?;
        let rows = states
            .rows
            .iter()
            .map(|r| (r.date, self.model.to_sifr(&r.values)))
            .collect();
        Ok(Trajectory::from_sifr(self.model.name(), rows))
    }

    fn observed_state(&self, date: NaiveDate) -> Option<Vec<f64>> {
        self.observed
            .as_ref()
            .and_then(|o| o.at(date))
            .map(|v| self.model.to_state(&v))
    }

    fn observed_span(&self, observed: &ObservedSeries) -> EngineResult<(NaiveDate, NaiveDate)> {
        let start = self.first_date().max(observed.first_date());
        let end = self.last_date().min(observed.last_date());
        if start > end {
            return Err(EngineError::invalid_series(format!(
                "records of '{}' ({}..{}) do not overlap the timeline {}..{}",
                observed.geo(),
                observed.first_date(),
                observed.last_date(),
                self.first_date(),
                self.last_date()
            )));
        }
        Ok((start, end))
    }

    /// Phases starting on `first` and on each of `starts`, with parameters
    /// taken from the current phase containing each start date.
    fn rebuild(&self, starts: &[NaiveDate]) -> EngineResult<Vec<Arc<Phase>>> {
        let mut edges = Vec::with_capacity(starts.len() + 1);
        edges.push(self.first_date());
        edges.extend(starts.iter().copied().filter(|&d| d > self.first_date()));

        let mut phases = Vec::with_capacity(edges.len());
        for (k, &start) in edges.iter().enumerate() {
            let end = edges
                .get(k + 1)
                .map(|&next| next - Duration::days(1))
                .unwrap_or_else(|| self.last_date());
            let source = self
                .phase_at(start)
                .ok_or_else(|| EngineError::consistency(format!("{start} is outside the timeline")))?;
            let current = &self.phases[source];
            if current.start == start && current.end == end {
                phases.push(Arc::clone(current));
                continue;
            }
            let mut phase = current.resized(start, end)?;
            if phase.initial_state.is_none() {
                phase.initial_state = self.observed_state(start);
            }
            phases.push(Arc::new(phase));
        }
        Ok(phases)
    }

    fn commit(&mut self, phases: Vec<Arc<Phase>>) -> EngineResult<()> {
        validate_phases(self.model.as_ref(), &phases)?;
        self.phases = phases;
        Ok(())
    }
}

fn validate_phases(model: &dyn OdeModel, phases: &[Arc<Phase>]) -> EngineResult<()> {
    if phases.is_empty() {
        return Err(EngineError::consistency("a timeline needs at least one phase"));
    }
    for (i, p) in phases.iter().enumerate() {
        if p.end < p.start {
            return Err(EngineError::consistency(format!(
                "phase {} ends ({}) before it starts ({})",
                phase_name(i),
                p.end,
                p.start
            )));
        }
        if p.model.name() != model.name() {
            return Err(EngineError::consistency(format!(
                "phase {} uses {} in a {} timeline",
                phase_name(i),
                p.model.name(),
                model.name()
            )));
        }
        if let Some(values) = &p.params {
            crate::models::check_parameters(model, values)?;
        }
        if i > 0 && phases[i - 1].end + Duration::days(1) != p.start {
            return Err(EngineError::consistency(format!(
                "phase {} starts {} but the previous phase ends {}",
                phase_name(i),
                p.start,
                phases[i - 1].end
            )));
        }
    }
    Ok(())
}

fn log_estimation(phase: &str, est: &Estimation) {
    if let Some(failure) = est.failure(phase) {
        warn!(phase, score = est.quality.score, "{failure}; keeping the low-confidence fit");
    } else {
        debug!(phase, score = est.quality.score, iterations = est.quality.iterations, "phase fitted");
    }
}
