//! Observed data access.
//!
//! Downloading and cleaning records happens outside the engine; a provider
//! only hands out cleaned, date-aligned series.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::ObservedSeries;
use crate::error::{EngineError, EngineResult};

/// Source of observed series keyed by geographic unit.
pub trait DataProvider: Send + Sync {
    /// Records of `geo` restricted to `range` (the whole series when `None`).
    ///
    /// Fails with [`EngineError::DataUnavailable`] when the unit is unknown or
    /// the range is not covered.
    fn fetch(&self, geo: &str, range: Option<(NaiveDate, NaiveDate)>) -> EngineResult<ObservedSeries>;
}

/// Provider over series held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: BTreeMap<String, ObservedSeries>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the series of its geographic unit.
    pub fn insert(&mut self, series: ObservedSeries) {
        self.series.insert(series.geo().to_string(), series);
    }

    pub fn with(mut self, series: ObservedSeries) -> Self {
        self.insert(series);
        self
    }

    pub fn geos(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }
}

impl DataProvider for InMemoryProvider {
    fn fetch(&self, geo: &str, range: Option<(NaiveDate, NaiveDate)>) -> EngineResult<ObservedSeries> {
        let unavailable = |reason: String| EngineError::DataUnavailable {
            geo: geo.to_string(),
            reason,
        };
        let series = self
            .series
            .get(geo)
            .ok_or_else(|| unavailable("no records".to_string()))?;
        match range {
            None => Ok(series.clone()),
            Some((start, end)) => {
                EngineError::check_range(start, end)?;
                if !series.covers(start, end) {
                    return Err(unavailable(format!(
                        "records cover {}..{}, requested {start}..{end}",
                        series.first_date(),
                        series.last_date()
                    )));
                }
                series.slice(start, end)
            }
        }
    }
}
