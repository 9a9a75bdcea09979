//! One phase: a date range with constant ODE parameters.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::domain::{FitQuality, ParamVector, PhaseTag};
use crate::error::{EngineError, EngineResult};
use crate::models::{OdeModel, check_parameters};

/// A phase record.
///
/// Records are shared between timelines (`Arc<Phase>`) and copied only when
/// one timeline edits them.
#[derive(Clone)]
pub struct Phase {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub model: Arc<dyn OdeModel>,
    /// `None` until estimated or set; unfit phases inherit the previous
    /// phase's values when simulated.
    pub params: Option<ParamVector>,
    pub tag: PhaseTag,
    /// Model state observed on `start`, when records cover that date.
    pub initial_state: Option<Vec<f64>>,
    pub quality: Option<FitQuality>,
}

impl Phase {
    /// A Past (unfit) phase over `start..=end`.
    pub fn new(model: Arc<dyn OdeModel>, start: NaiveDate, end: NaiveDate) -> EngineResult<Self> {
        EngineError::check_range(start, end)?;
        Ok(Self {
            start,
            end,
            model,
            params: None,
            tag: PhaseTag::Past,
            initial_state: None,
            quality: None,
        })
    }

    /// Same phase with checked parameter values and a new provenance tag.
    pub fn with_params(mut self, params: ParamVector, tag: PhaseTag) -> EngineResult<Self> {
        check_parameters(self.model.as_ref(), &params)?;
        self.params = Some(params);
        self.tag = tag;
        self.quality = None;
        Ok(self)
    }

    /// Same parameters and provenance over another range. Fit diagnostics are
    /// kept only when the range is unchanged.
    pub fn resized(&self, start: NaiveDate, end: NaiveDate) -> EngineResult<Self> {
        EngineError::check_range(start, end)?;
        let same = start == self.start && end == self.end;
        Ok(Self {
            start,
            end,
            model: Arc::clone(&self.model),
            params: self.params.clone(),
            tag: self.tag,
            initial_state: if start == self.start { self.initial_state.clone() } else { None },
            quality: if same { self.quality.clone() } else { None },
        })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start <= end && start <= self.end
    }

    pub fn rt(&self) -> Option<f64> {
        self.params
            .as_deref()
            .map(|p| self.model.reproduction_number(p))
    }
}

impl PartialEq for Phase {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.model.name() == other.model.name()
            && self.params == other.params
            && self.tag == other.tag
            && self.initial_state == other.initial_state
            && self.quality == other.quality
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("model", &self.model.name())
            .field("params", &self.params)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}
