//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during segmentation, fitting and simulation
//! - printed as JSON by the binary
//! - handed to a presentation layer as-is

use chrono::{Duration, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One value per declared model parameter, in schema order.
pub type ParamVector = Vec<f64>;

pub const SUSCEPTIBLE: &str = "Susceptible";
pub const INFECTED: &str = "Infected";
pub const RECOVERED: &str = "Recovered";
pub const FATAL: &str = "Fatal";
pub const FATAL_OR_RECOVERED: &str = "Fatal or Recovered";
pub const CONFIRMED: &str = "Confirmed";

/// Canonical variable order of [`Sifr`] trajectories.
pub const SIFR_VARIABLES: [&str; 4] = [SUSCEPTIBLE, INFECTED, FATAL, RECOVERED];

/// Canonical compartment values shared by every model.
///
/// Models convert from/to this representation (`to_state` / `to_sifr`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sifr {
    pub susceptible: f64,
    pub infected: f64,
    pub fatal: f64,
    pub recovered: f64,
}

impl Sifr {
    pub fn new(susceptible: f64, infected: f64, fatal: f64, recovered: f64) -> Self {
        Self {
            susceptible,
            infected,
            fatal,
            recovered,
        }
    }

    pub fn total(&self) -> f64 {
        self.susceptible + self.infected + self.fatal + self.recovered
    }

    pub fn confirmed(&self) -> f64 {
        self.infected + self.fatal + self.recovered
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.susceptible, self.infected, self.fatal, self.recovered]
    }

    pub fn get(&self, variable: &str) -> Option<f64> {
        match variable {
            SUSCEPTIBLE => Some(self.susceptible),
            INFECTED => Some(self.infected),
            FATAL => Some(self.fatal),
            RECOVERED => Some(self.recovered),
            FATAL_OR_RECOVERED => Some(self.fatal + self.recovered),
            CONFIRMED => Some(self.confirmed()),
            _ => None,
        }
    }
}

/// A raw daily record of one geographic unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub confirmed: f64,
    pub fatal: f64,
    pub recovered: f64,
}

/// Cleaned, date-aligned records of one geographic unit.
///
/// Invariants (checked by [`ObservedSeries::new`]):
/// - at least one record
/// - dates strictly increasing by exactly one day (gap-free)
/// - counts finite and non-negative, `confirmed >= fatal + recovered`
/// - `population >= confirmed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesFields")]
pub struct ObservedSeries {
    geo: String,
    population: f64,
    records: Vec<Record>,
}

/// Deserialized form of [`ObservedSeries`], validated by `new`.
#[derive(Deserialize)]
struct SeriesFields {
    geo: String,
    population: f64,
    records: Vec<Record>,
}

impl TryFrom<SeriesFields> for ObservedSeries {
    type Error = EngineError;

    fn try_from(fields: SeriesFields) -> EngineResult<Self> {
        Self::new(fields.geo, fields.population, fields.records)
    }
}

impl ObservedSeries {
    pub fn new(geo: impl Into<String>, population: f64, records: Vec<Record>) -> EngineResult<Self> {
        let geo = geo.into();
        if !(population.is_finite() && population > 0.0) {
            return Err(EngineError::invalid_series(format!(
                "population of '{geo}' must be finite and > 0, got {population}"
            )));
        }
        if records.is_empty() {
            return Err(EngineError::invalid_series(format!("no records for '{geo}'")));
        }
        for (i, r) in records.iter().enumerate() {
            let counts = [r.confirmed, r.fatal, r.recovered];
            if counts.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(EngineError::invalid_series(format!(
                    "negative or non-finite count on {}",
                    r.date
                )));
            }
            if r.fatal + r.recovered > r.confirmed {
                return Err(EngineError::invalid_series(format!(
                    "fatal + recovered exceeds confirmed on {}",
                    r.date
                )));
            }
            if r.confirmed > population {
                return Err(EngineError::invalid_series(format!(
                    "confirmed exceeds population on {}",
                    r.date
                )));
            }
            if i > 0 && r.date - records[i - 1].date != Duration::days(1) {
                return Err(EngineError::invalid_series(format!(
                    "dates must be consecutive days ({} follows {})",
                    r.date,
                    records[i - 1].date
                )));
            }
        }
        Ok(Self {
            geo,
            population,
            records,
        })
    }

    pub fn geo(&self) -> &str {
        &self.geo
    }

    pub fn population(&self) -> f64 {
        self.population
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.records[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.records[self.records.len() - 1].date
    }

    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start >= self.first_date() && end <= self.last_date() && start <= end
    }

    /// Position of `date` in the series, if covered.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        if date < self.first_date() || date > self.last_date() {
            return None;
        }
        usize::try_from((date - self.first_date()).num_days()).ok()
    }

    pub fn sifr_of(&self, record: &Record) -> Sifr {
        Sifr {
            susceptible: self.population - record.confirmed,
            infected: record.confirmed - record.fatal - record.recovered,
            fatal: record.fatal,
            recovered: record.recovered,
        }
    }

    /// Canonical compartment values of every record, with their dates.
    pub fn sifr(&self) -> Vec<(NaiveDate, Sifr)> {
        self.records.iter().map(|r| (r.date, self.sifr_of(r))).collect()
    }

    /// Canonical compartment values on `date`.
    pub fn at(&self, date: NaiveDate) -> Option<Sifr> {
        self.index_of(date).map(|i| self.sifr_of(&self.records[i]))
    }

    /// Canonical compartment values for every date in `start..=end`.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> EngineResult<Vec<Sifr>> {
        EngineError::check_range(start, end)?;
        if !self.covers(start, end) {
            return Err(EngineError::invalid_series(format!(
                "'{}' covers {}..{}, requested {start}..{end}",
                self.geo,
                self.first_date(),
                self.last_date()
            )));
        }
        let (i0, i1) = match (self.index_of(start), self.index_of(end)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(EngineError::invalid_series("window outside the series")),
        };
        Ok(self.records[i0..=i1].iter().map(|r| self.sifr_of(r)).collect())
    }

    /// Sub-series restricted to `start..=end`.
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> EngineResult<ObservedSeries> {
        EngineError::check_range(start, end)?;
        let records: Vec<Record> = self
            .records
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .copied()
            .collect();
        ObservedSeries::new(self.geo.clone(), self.population, records)
    }
}

/// Provenance of a phase's parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PhaseTag {
    /// Historical phase whose parameters have not been estimated yet.
    Past,
    /// Estimated from observed records.
    Fitted,
    /// Parameters set explicitly by the user.
    Simulated,
    /// Produced by a predictor.
    Predicted,
}

impl PhaseTag {
    pub fn label(self) -> &'static str {
        match self {
            PhaseTag::Past => "Past",
            PhaseTag::Fitted => "Fitted",
            PhaseTag::Simulated => "Simulated",
            PhaseTag::Predicted => "Predicted",
        }
    }

    /// Phases whose parameters were chosen by someone rather than estimated.
    pub fn is_manual(self) -> bool {
        matches!(self, PhaseTag::Simulated | PhaseTag::Predicted)
    }
}

/// Error metric used to compare simulated and observed trajectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Root mean squared log error, `sqrt(mean((ln(1+sim) - ln(1+obs))^2))`.
    Rmsle,
    /// Root mean squared relative error (denominator floored at 1).
    Rmsre,
    /// Mean absolute error.
    Mae,
    /// Root mean squared error.
    Rmse,
}

impl Metric {
    pub fn display_name(self) -> &'static str {
        match self {
            Metric::Rmsle => "RMSLE",
            Metric::Rmsre => "RMSRE",
            Metric::Mae => "MAE",
            Metric::Rmse => "RMSE",
        }
    }
}

/// How much a fit can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Fit quality diagnostics of one estimated phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub metric: Metric,
    pub score: f64,
    /// Optimizer iterations of the selected run.
    pub iterations: usize,
    /// Objective evaluations summed over all restarts.
    pub evaluations: usize,
    pub restarts: usize,
    pub converged: bool,
    pub confidence: Confidence,
}

/// One simulated day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    pub date: NaiveDate,
    pub values: Vec<f64>,
}

/// Daily compartment values, one row per date, columns named by `variables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub model: String,
    pub variables: Vec<String>,
    pub rows: Vec<TrajectoryRow>,
}

impl Trajectory {
    /// Canonical (S, I, F, R) trajectory.
    pub fn from_sifr(model: impl Into<String>, rows: Vec<(NaiveDate, Sifr)>) -> Self {
        Self {
            model: model.into(),
            variables: SIFR_VARIABLES.iter().map(|v| v.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|(date, v)| TrajectoryRow {
                    date,
                    values: v.as_array().to_vec(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    pub fn last_values(&self) -> Option<&[f64]> {
        self.rows.last().map(|r| r.values.as_slice())
    }

    pub fn variable_index(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == variable)
    }

    pub fn column(&self, variable: &str) -> Option<Vec<f64>> {
        let idx = self.variable_index(variable)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    pub fn value(&self, variable: &str, date: NaiveDate) -> Option<f64> {
        let idx = self.variable_index(variable)?;
        let first = self.first_date()?;
        let pos = usize::try_from((date - first).num_days()).ok()?;
        self.rows.get(pos).map(|r| r.values[idx])
    }

    /// Every row as canonical compartments; `None` unless this is a SIFR trajectory.
    pub fn to_sifr(&self) -> Option<Vec<(NaiveDate, Sifr)>> {
        (0..self.rows.len())
            .map(|pos| self.sifr_row(pos).map(|v| (self.rows[pos].date, v)))
            .collect()
    }

    /// Canonical compartments of one row; `None` unless this is a SIFR trajectory.
    pub fn sifr_row(&self, pos: usize) -> Option<Sifr> {
        let row = self.rows.get(pos)?;
        let get = |name: &str| self.variable_index(name).map(|i| row.values[i]);
        Some(Sifr {
            susceptible: get(SUSCEPTIBLE)?,
            infected: get(INFECTED)?,
            fatal: get(FATAL)?,
            recovered: get(RECOVERED)?,
        })
    }
}

/// Ordinal phase name: `0th`, `1st`, `2nd`, `3rd`, `4th`, ..., `11th`, `21st`.
pub fn phase_name(index: usize) -> String {
    let suffix = match (index % 10, index % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{index}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 1).unwrap() + Duration::days(offset)
    }

    fn record(offset: i64, confirmed: f64, fatal: f64, recovered: f64) -> Record {
        Record {
            date: day(offset),
            confirmed,
            fatal,
            recovered,
        }
    }

    #[test]
    fn phase_names_use_english_ordinals() {
        let names: Vec<String> = [0, 1, 2, 3, 4, 11, 12, 13, 21, 22, 101, 111]
            .iter()
            .map(|&i| phase_name(i))
            .collect();
        assert_eq!(
            names,
            ["0th", "1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "101st", "111th"]
        );
    }

    #[test]
    fn series_rejects_gaps_and_negative_counts() {
        let gap = vec![record(0, 10.0, 0.0, 0.0), record(2, 12.0, 0.0, 1.0)];
        assert!(matches!(
            ObservedSeries::new("x", 1000.0, gap),
            Err(EngineError::InvalidSeries(_))
        ));

        let negative = vec![record(0, -1.0, 0.0, 0.0)];
        assert!(ObservedSeries::new("x", 1000.0, negative).is_err());

        let inconsistent = vec![record(0, 10.0, 6.0, 6.0)];
        assert!(ObservedSeries::new("x", 1000.0, inconsistent).is_err());
    }

    #[test]
    fn deserialized_series_are_validated() {
        let series = ObservedSeries::new("x", 1000.0, vec![record(0, 10.0, 1.0, 2.0)]).unwrap();
        let json = serde_json::to_string(&series).unwrap();
        let back: ObservedSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back, series);

        let empty = r#"{"geo": "x", "population": 1000.0, "records": []}"#;
        let err = serde_json::from_str::<ObservedSeries>(empty).unwrap_err();
        assert!(err.to_string().contains("no records"), "{err}");
    }

    #[test]
    fn series_converts_records_to_sifr() {
        let series = ObservedSeries::new(
            "x",
            1000.0,
            vec![record(0, 100.0, 5.0, 20.0), record(1, 120.0, 6.0, 30.0)],
        )
        .unwrap();
        let s = series.at(day(1)).unwrap();
        assert_eq!(s, Sifr::new(880.0, 84.0, 6.0, 30.0));
        assert_eq!(s.total(), 1000.0);
        assert!(series.at(day(2)).is_none());
        assert_eq!(series.window(day(0), day(1)).unwrap().len(), 2);
        assert!(series.window(day(0), day(3)).is_err());
        assert_eq!(series.sifr()[0], (day(0), Sifr::new(900.0, 75.0, 5.0, 20.0)));
    }

    #[test]
    fn trajectory_lookups_by_name_and_date() {
        let t = Trajectory::from_sifr(
            "SIR-F",
            vec![(day(0), Sifr::new(1.0, 2.0, 3.0, 4.0)), (day(1), Sifr::new(5.0, 6.0, 7.0, 8.0))],
        );
        assert_eq!(t.value(INFECTED, day(1)), Some(6.0));
        assert_eq!(t.column(FATAL), Some(vec![3.0, 7.0]));
        assert_eq!(t.sifr_row(0), Some(Sifr::new(1.0, 2.0, 3.0, 4.0)));
        assert!(t.value("Exposed", day(0)).is_none());
        assert_eq!(t.to_sifr().unwrap()[1], (day(1), Sifr::new(5.0, 6.0, 7.0, 8.0)));

        let states = Trajectory {
            model: "SIR".to_string(),
            variables: vec![SUSCEPTIBLE.to_string(), INFECTED.to_string(), FATAL_OR_RECOVERED.to_string()],
            rows: t.rows.clone(),
        };
        assert!(states.to_sifr().is_none());
    }
}
