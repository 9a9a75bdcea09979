//! SIR-derived model implementations.
//!
//! All parameters are non-dimensional daily rates (tau = 1 day), so every
//! schema range is `[0, 1]`.
//!
//! - SIR:   S -> I -> R* (R* = recovered + fatal)
//! - SIR-D: S -> I -> R, I -> D
//! - SIR-F: S -> I -> R, I -> F, and a fraction `theta` of new cases is fatal
//!   directly (S -> F)

use crate::domain::{FATAL, FATAL_OR_RECOVERED, INFECTED, RECOVERED, SUSCEPTIBLE, Sifr};
use crate::models::model::{OdeModel, ParamSpec};

const fn rate(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        lower: 0.0,
        upper: 1.0,
        rate: true,
    }
}

/// Daily-difference sums used by the closed-form guesses.
#[derive(Debug, Clone, Copy)]
struct FlowSums {
    infected: f64,
    new_cases: f64,
    contacts: f64,
    recovered: f64,
    fatal: f64,
}

fn flow_sums(window: &[Sifr], population: f64) -> Option<FlowSums> {
    if window.len() < 2 || population <= 0.0 {
        return None;
    }
    let mut sums = FlowSums {
        infected: 0.0,
        new_cases: 0.0,
        contacts: 0.0,
        recovered: 0.0,
        fatal: 0.0,
    };
    for pair in window.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        sums.infected += a.infected;
        sums.contacts += a.susceptible * a.infected / population;
        sums.new_cases += a.susceptible - b.susceptible;
        sums.recovered += b.recovered - a.recovered;
        sums.fatal += b.fatal - a.fatal;
    }
    if sums.infected <= 0.0 || sums.contacts <= 0.0 {
        return None;
    }
    Some(sums)
}

/// SIR model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sir;

impl OdeModel for Sir {
    fn name(&self) -> &'static str {
        "SIR"
    }

    fn variables(&self) -> &'static [&'static str] {
        &[SUSCEPTIBLE, INFECTED, FATAL_OR_RECOVERED]
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        static PARAMS: [ParamSpec; 2] = [rate("rho"), rate("sigma")];
        &PARAMS
    }

    fn derivative(&self, _t: f64, x: &[f64], p: &[f64], n: f64, out: &mut [f64]) {
        let (rho, sigma) = (p[0], p[1]);
        let infection = rho * x[0] * x[1] / n;
        out[0] = -infection;
        out[1] = infection - sigma * x[1];
        out[2] = sigma * x[1];
    }

    fn to_state(&self, s: &Sifr) -> Vec<f64> {
        vec![s.susceptible, s.infected, s.fatal + s.recovered]
    }

    fn to_sifr(&self, x: &[f64]) -> Sifr {
        Sifr::new(x[0], x[1], 0.0, x[2])
    }

    fn reproduction_number(&self, p: &[f64]) -> f64 {
        if p[1] > 0.0 { p[0] / p[1] } else { f64::INFINITY }
    }

    fn guess(&self, window: &[Sifr], population: f64) -> Option<Vec<f64>> {
        let sums = flow_sums(window, population)?;
        let rho = sums.new_cases / sums.contacts;
        let sigma = (sums.recovered + sums.fatal) / sums.infected;
        Some(vec![rho, sigma])
    }
}

/// SIR-D model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sird;

impl OdeModel for Sird {
    fn name(&self) -> &'static str {
        "SIR-D"
    }

    fn variables(&self) -> &'static [&'static str] {
        &[SUSCEPTIBLE, INFECTED, RECOVERED, FATAL]
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        static PARAMS: [ParamSpec; 3] = [rate("kappa"), rate("rho"), rate("sigma")];
        &PARAMS
    }

    fn derivative(&self, _t: f64, x: &[f64], p: &[f64], n: f64, out: &mut [f64]) {
        let (kappa, rho, sigma) = (p[0], p[1], p[2]);
        let infection = rho * x[0] * x[1] / n;
        out[0] = -infection;
        out[1] = infection - (sigma + kappa) * x[1];
        out[2] = sigma * x[1];
        out[3] = kappa * x[1];
    }

    fn to_state(&self, s: &Sifr) -> Vec<f64> {
        vec![s.susceptible, s.infected, s.recovered, s.fatal]
    }

    fn to_sifr(&self, x: &[f64]) -> Sifr {
        Sifr::new(x[0], x[1], x[3], x[2])
    }

    fn reproduction_number(&self, p: &[f64]) -> f64 {
        let out = p[0] + p[2];
        if out > 0.0 { p[1] / out } else { f64::INFINITY }
    }

    fn guess(&self, window: &[Sifr], population: f64) -> Option<Vec<f64>> {
        let sums = flow_sums(window, population)?;
        Some(vec![
            sums.fatal / sums.infected,
            sums.new_cases / sums.contacts,
            sums.recovered / sums.infected,
        ])
    }
}

/// SIR-F model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sirf;

impl OdeModel for Sirf {
    fn name(&self) -> &'static str {
        "SIR-F"
    }

    fn variables(&self) -> &'static [&'static str] {
        &[SUSCEPTIBLE, INFECTED, RECOVERED, FATAL]
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        static PARAMS: [ParamSpec; 4] = [
            ParamSpec {
                name: "theta",
                lower: 0.0,
                upper: 1.0,
                rate: false,
            },
            rate("kappa"),
            rate("rho"),
            rate("sigma"),
        ];
        &PARAMS
    }

    fn derivative(&self, _t: f64, x: &[f64], p: &[f64], n: f64, out: &mut [f64]) {
        let (theta, kappa, rho, sigma) = (p[0], p[1], p[2], p[3]);
        let infection = rho * x[0] * x[1] / n;
        out[0] = -infection;
        out[1] = (1.0 - theta) * infection - (sigma + kappa) * x[1];
        out[2] = sigma * x[1];
        out[3] = theta * infection + kappa * x[1];
    }

    fn to_state(&self, s: &Sifr) -> Vec<f64> {
        vec![s.susceptible, s.infected, s.recovered, s.fatal]
    }

    fn to_sifr(&self, x: &[f64]) -> Sifr {
        Sifr::new(x[0], x[1], x[3], x[2])
    }

    fn reproduction_number(&self, p: &[f64]) -> f64 {
        let out = p[1] + p[3];
        if out > 0.0 {
            p[2] * (1.0 - p[0]) / out
        } else {
            f64::INFINITY
        }
    }

    fn guess(&self, window: &[Sifr], population: f64) -> Option<Vec<f64>> {
        // Attribute every death to kappa; the optimizer moves mass to theta.
        let sums = flow_sums(window, population)?;
        Some(vec![
            0.0,
            sums.fatal / sums.infected,
            sums.new_cases / sums.contacts,
            sums.recovered / sums.infected,
        ])
    }
}
