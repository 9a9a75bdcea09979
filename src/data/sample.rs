//! Synthetic outbreak generation.
//!
//! A sample is a simulated trajectory of one model with piecewise-constant
//! parameters ("regimes"), optionally perturbed by seeded multiplicative
//! Gaussian noise, returned as an [`ObservedSeries`]. Same builder, same
//! series: the noise comes from `StdRng::seed_from_u64(seed)`.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::domain::{ObservedSeries, ParamVector, Record, Sifr, SimulatorConfig};
use crate::error::{EngineError, EngineResult};
use crate::models::{OdeModel, check_parameters};
use crate::sim::simulator::{check_initial_state, integrate};

#[derive(Debug, Clone)]
pub struct SampleBuilder {
    model: Arc<dyn OdeModel>,
    geo: String,
    population: f64,
    start: NaiveDate,
    days: usize,
    initial_infected: f64,
    regimes: Vec<(usize, ParamVector)>,
    noise: f64,
    seed: u64,
    simulator: SimulatorConfig,
}

impl SampleBuilder {
    pub fn new(model: Arc<dyn OdeModel>, population: f64) -> Self {
        Self {
            model,
            geo: "Synthetic".to_string(),
            population,
            start: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or_default(),
            days: 120,
            initial_infected: 1_000.0,
            regimes: Vec::new(),
            noise: 0.0,
            seed: 0,
            simulator: SimulatorConfig::default(),
        }
    }

    pub fn geo(mut self, geo: impl Into<String>) -> Self {
        self.geo = geo.into();
        self
    }

    pub fn start(mut self, start: NaiveDate) -> Self {
        self.start = start;
        self
    }

    pub fn days(mut self, days: usize) -> Self {
        self.days = days;
        self
    }

    pub fn initial_infected(mut self, infected: f64) -> Self {
        self.initial_infected = infected;
        self
    }

    /// Parameters in effect from day `start_day` (0-based) on.
    pub fn regime(mut self, start_day: usize, params: ParamVector) -> Self {
        self.regimes.push((start_day, params));
        self
    }

    /// Standard deviation of the multiplicative noise (0 = noiseless).
    pub fn noise(mut self, level: f64) -> Self {
        self.noise = level;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn simulator(mut self, config: SimulatorConfig) -> Self {
        self.simulator = config;
        self
    }

    pub fn first_date(&self) -> NaiveDate {
        self.start
    }

    pub fn last_date(&self) -> NaiveDate {
        self.start + Duration::days(self.days.saturating_sub(1) as i64)
    }

    /// Noiseless canonical values of every day.
    pub fn truth(&self) -> EngineResult<Vec<Sifr>> {
        self.validate()?;
        let mut regimes = self.regimes.clone();
        regimes.sort_by_key(|(day, _)| *day);

        let model = self.model.as_ref();
        let mut state = model.to_state(&Sifr::new(
            self.population - self.initial_infected,
            self.initial_infected,
            0.0,
            0.0,
        ));
        check_initial_state(model, &state)?;

        let mut out = Vec::with_capacity(self.days);
        for (k, (from, params)) in regimes.iter().enumerate() {
            let until = regimes
                .get(k + 1)
                .map(|(next, _)| *next)
                .unwrap_or(self.days)
                .min(self.days);
            if until <= *from {
                continue;
            }
            let mut states = integrate(model, &state, params, until - from, &self.simulator);
            state = states.pop().unwrap_or_default();
            out.extend(states.iter().map(|s| model.to_sifr(s)));
        }
        Ok(out)
    }

    pub fn build(&self) -> EngineResult<ObservedSeries> {
        let truth = self.truth()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = if self.noise > 0.0 {
            Some(
                Normal::new(1.0, self.noise)
                    .map_err(|e| EngineError::invalid_parameter(format!("noise: {e}")))?,
            )
        } else {
            None
        };
        let mut factor = || normal.map_or(1.0, |n| n.sample(&mut rng).max(0.0));

        let records = truth
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let infected = v.infected * factor();
                let fatal = v.fatal * factor();
                let recovered = v.recovered * factor();
                Record {
                    date: self.start + Duration::days(i as i64),
                    confirmed: (infected + fatal + recovered).min(self.population),
                    fatal,
                    recovered,
                }
            })
            .map(|mut r| {
                // Rounding the cap above may leave confirmed below F + R.
                if r.fatal + r.recovered > r.confirmed {
                    let scale = r.confirmed / (r.fatal + r.recovered);
                    r.fatal *= scale;
                    r.recovered *= scale;
                }
                r
            })
            .collect();
        ObservedSeries::new(self.geo.clone(), self.population, records)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.days == 0 {
            return Err(EngineError::invalid_parameter("sample needs at least one day"));
        }
        if !(self.population.is_finite() && self.population > 0.0) {
            return Err(EngineError::invalid_parameter("population must be finite and > 0"));
        }
        if !(self.initial_infected.is_finite()
            && self.initial_infected > 0.0
            && self.initial_infected < self.population)
        {
            return Err(EngineError::invalid_parameter(
                "initial infected must lie in (0, population)",
            ));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(EngineError::invalid_parameter("noise must be finite and >= 0"));
        }
        if !self.regimes.iter().any(|(day, _)| *day == 0) {
            return Err(EngineError::invalid_parameter("a regime must start on day 0"));
        }
        for (_, params) in &self.regimes {
            check_parameters(self.model.as_ref(), params)?;
        }
        self.simulator.validate()
    }
}
