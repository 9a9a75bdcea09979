//! The S-R signal.
//!
//! With constant parameters, `dS/dt = -rho S I / N` and `dR/dt = sigma I`
//! give `d ln S / dR = -rho / (sigma N)`: `ln S` is linear in `R` within a
//! phase, and a parameter change shows up as a slope change.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::ObservedSeries;
use crate::error::EngineResult;

/// `x = Recovered`, `y = ln(Susceptible)` for each date of a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SrSignal {
    pub dates: Vec<NaiveDate>,
    pub recovered: Vec<f64>,
    pub log_susceptible: Vec<f64>,
}

impl SrSignal {
    pub fn from_series(series: &ObservedSeries, start: NaiveDate, end: NaiveDate) -> EngineResult<Self> {
        let window = series.window(start, end)?;
        let dates = (0..window.len())
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        let recovered = window.iter().map(|v| v.recovered).collect();
        // S >= 1 keeps the log finite once the susceptible pool is exhausted.
        let log_susceptible = window.iter().map(|v| v.susceptible.max(1.0).ln()).collect();
        Ok(Self {
            dates,
            recovered,
            log_susceptible,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// `max(y) - min(y)`.
    pub fn y_range(&self) -> f64 {
        let (lo, hi) = self
            .log_susceptible
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &y| (lo.min(y), hi.max(y)));
        if lo.is_finite() && hi.is_finite() { hi - lo } else { 0.0 }
    }

    /// Residuals of each interior point against the line through its two
    /// neighbours. Used to estimate the noise scale of the signal.
    pub fn local_residuals(&self) -> Vec<f64> {
        let (x, y) = (&self.recovered, &self.log_susceptible);
        let mut out = Vec::with_capacity(self.len().saturating_sub(2));
        for i in 1..self.len().saturating_sub(1) {
            let dx = x[i + 1] - x[i - 1];
            let predicted = if dx.abs() > f64::EPSILON {
                y[i - 1] + (y[i + 1] - y[i - 1]) * (x[i] - x[i - 1]) / dx
            } else {
                (y[i - 1] + y[i + 1]) / 2.0
            };
            out.push(y[i] - predicted);
        }
        out
    }
}
