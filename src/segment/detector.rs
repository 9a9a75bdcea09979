//! Change-point search on the S-R signal.
//!
//! Approach:
//! - optimal partitioning (exact dynamic program) over segment-wise straight
//!   line SSE with a per-segment penalty
//! - enforce the minimum phase length: when two boundaries (or a boundary and
//!   a series edge) are closer than `min_phase_days`, drop the boundary with
//!   the smaller residual reduction, then recompute and repeat
//!
//! The noise of the signal grows with the counts, so the search runs twice:
//! - first with one noise scale `σ` (MAD of local residuals), penalty
//!   `penalty · σ² · ln n`
//! - then weighted by per-day scales taken from the residuals of the first
//!   partition, penalty `penalty · ln n`
//!
//! Every scale is floored at `noise_floor · range(y)` so that near-noiseless
//! simulated data does not get split on integration round-off.
//!
//! No significant change point is not an error: the result is then empty and
//! the whole window is one phase.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::domain::{ObservedSeries, SegmenterConfig};
use crate::error::EngineResult;
use crate::math::{LineSums, linear_fit, mad_sigma, median_mut};
use crate::segment::signal::SrSignal;

/// A detected boundary: the first date of a new phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChangePoint {
    pub date: NaiveDate,
    /// SSE reduction of keeping this boundary versus merging its neighbours.
    pub gain: f64,
}

/// Result of one change-point search over `start..=end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segmentation {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Ordered, deduplicated interior boundaries. The window edges are implicit.
    pub change_points: Vec<ChangePoint>,
    /// Median per-day noise scale of the signal.
    pub noise: f64,
    /// Penalty per added segment of the weighted search.
    pub penalty: f64,
}

impl Segmentation {
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.change_points.iter().map(|c| c.date).collect()
    }

    /// Inclusive date ranges of the implied phases.
    pub fn phase_ranges(&self) -> Vec<(NaiveDate, NaiveDate)> {
        let mut out = Vec::with_capacity(self.change_points.len() + 1);
        let mut start = self.start;
        for cp in &self.change_points {
            out.push((start, cp.date - Duration::days(1)));
            start = cp.date;
        }
        out.push((start, self.end));
        out
    }
}

/// Search change points of `series` within `start..=end`.
pub fn detect(
    series: &ObservedSeries,
    start: NaiveDate,
    end: NaiveDate,
    config: &SegmenterConfig,
) -> EngineResult<Segmentation> {
    config.validate()?;
    let signal = SrSignal::from_series(series, start, end)?;
    let n = signal.len();
    let mut out = Segmentation {
        start,
        end,
        change_points: Vec::new(),
        noise: 0.0,
        penalty: 0.0,
    };

    let range = signal.y_range();
    if n < 2 * config.min_segment_points || range <= 0.0 {
        debug!(geo = series.geo(), n, "S-R signal too short or flat, single phase");
        return Ok(out);
    }

    let floor = config.noise_floor * range;
    let xs = standardized(&signal.recovered);
    let ys = centered(&signal.log_susceptible);
    let ln_n = (n as f64).ln();

    let global = (mad_sigma(&signal.local_residuals()).unwrap_or(0.0) / 1.5f64.sqrt()).max(floor);
    let first = search(&LineSums::new(&xs, &ys), config, config.penalty * global * global * ln_n);

    let scales = local_scales(&xs, &ys, &first, floor);
    let weights: Vec<f64> = scales.iter().map(|s| 1.0 / (s * s)).collect();
    let sums = LineSums::weighted(&xs, &ys, &weights);
    let penalty = config.penalty * ln_n;
    let bounds = search(&sums, config, penalty);
    let gains = boundary_gains(&sums, &bounds);
    let noise = median_mut(&mut scales.clone()).unwrap_or(floor);
    out.noise = noise;
    out.penalty = penalty;

    out.change_points = bounds
        .iter()
        .zip(gains)
        .map(|(&b, gain)| ChangePoint {
            date: signal.dates[b],
            gain,
        })
        .collect();

    debug!(
        geo = series.geo(),
        n,
        noise,
        penalty,
        first_pass = first.len(),
        kept = out.change_points.len(),
        "S-R change-point search"
    );
    Ok(out)
}

/// Penalized partition followed by the minimum phase length.
fn search(sums: &LineSums, config: &SegmenterConfig, penalty: f64) -> Vec<usize> {
    let raw = optimal_partition(sums, config.min_segment_points, penalty);
    enforce_min_length(sums, raw, config.min_phase_days as usize)
}

/// Zero mean, unit spread (a constant series only loses its mean).
fn standardized(values: &[f64]) -> Vec<f64> {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let scale = if sd > 0.0 { sd } else { 1.0 };
    values.iter().map(|v| (v - mean) / scale).collect()
}

/// Zero mean; the spread is kept so that SSEs stay in units of the signal.
fn centered(values: &[f64]) -> Vec<f64> {
    let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
    values.iter().map(|v| v - mean).collect()
}

/// Days on each side of a point whose residuals give its noise scale.
const SCALE_HALF_WINDOW: usize = 7;

/// Per-day noise scale: rolling MAD of the residuals of a straight line per
/// segment of `bounds`, floored at `floor`.
fn local_scales(xs: &[f64], ys: &[f64], bounds: &[usize], floor: f64) -> Vec<f64> {
    let n = xs.len();
    let mut edges = Vec::with_capacity(bounds.len() + 2);
    edges.push(0);
    edges.extend_from_slice(bounds);
    edges.push(n);

    let mut residuals = Vec::with_capacity(n);
    for pair in edges.windows(2) {
        let (x, y) = (&xs[pair[0]..pair[1]], &ys[pair[0]..pair[1]]);
        let m = y.len();
        let (a, b) = linear_fit(x, y).unwrap_or_else(|| (y.iter().sum::<f64>() / m.max(1) as f64, 0.0));
        // Two fitted coefficients per segment.
        let dof = if m > 2 { (m as f64 / (m - 2) as f64).sqrt() } else { 1.0 };
        residuals.extend(x.iter().zip(y).map(|(xi, yi)| (yi - a - b * xi) * dof));
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(SCALE_HALF_WINDOW);
            let hi = (i + SCALE_HALF_WINDOW + 1).min(n);
            mad_sigma(&residuals[lo..hi]).unwrap_or(0.0).max(floor)
        })
        .collect()
}

/// Exact penalized segmentation; returns interior boundary indices (the
/// first point of each new segment).
fn optimal_partition(sums: &LineSums, min_points: usize, penalty: f64) -> Vec<usize> {
    let n = sums.len();
    if n < 2 * min_points {
        return Vec::new();
    }

    let mut best = vec![f64::INFINITY; n + 1];
    let mut prev = vec![0usize; n + 1];
    best[0] = -penalty;

    for j in min_points..=n {
        for i in 0..=(j - min_points) {
            if !best[i].is_finite() {
                continue;
            }
            let cost = best[i] + sums.sse(i, j) + penalty;
            if cost < best[j] {
                best[j] = cost;
                prev[j] = i;
            }
        }
    }

    let mut bounds = Vec::new();
    let mut j = n;
    while j > 0 {
        let i = prev[j];
        if i > 0 {
            bounds.push(i);
        }
        j = i;
    }
    bounds.reverse();
    bounds
}

/// Residual reduction of each boundary relative to merging the two segments
/// around it.
fn boundary_gains(sums: &LineSums, bounds: &[usize]) -> Vec<f64> {
    let n = sums.len();
    (0..bounds.len())
        .map(|k| {
            let left = if k == 0 { 0 } else { bounds[k - 1] };
            let right = bounds.get(k + 1).copied().unwrap_or(n);
            sums.sse(left, right) - sums.sse(left, bounds[k]) - sums.sse(bounds[k], right)
        })
        .collect()
}

/// Drop boundaries until every phase (edges included) spans at least
/// `min_len` points, always removing the weakest boundary involved in a
/// violation.
fn enforce_min_length(sums: &LineSums, mut bounds: Vec<usize>, min_len: usize) -> Vec<usize> {
    let n = sums.len();
    loop {
        let gains = boundary_gains(sums, &bounds);
        let mut victim: Option<(f64, usize)> = None;

        // Gap k lies between edge k and edge k+1 of [0, bounds.., n]; its
        // removable endpoints are bounds[k-1] (left) and bounds[k] (right).
        for k in 0..=bounds.len() {
            let left_edge = if k == 0 { 0 } else { bounds[k - 1] };
            let right_edge = bounds.get(k).copied().unwrap_or(n);
            if right_edge - left_edge >= min_len {
                continue;
            }
            let left = k.checked_sub(1);
            let right = (k < bounds.len()).then_some(k);
            let weaker = match (left, right) {
                (Some(l), Some(r)) => {
                    if gains[r] < gains[l] {
                        r
                    } else {
                        l
                    }
                }
                (Some(l), None) => l,
                (None, Some(r)) => r,
                (None, None) => continue,
            };
            if victim.is_none_or(|(g, _)| gains[weaker] < g) {
                victim = Some((gains[weaker], weaker));
            }
        }

        match victim {
            Some((_, idx)) => {
                bounds.remove(idx);
            }
            None => return bounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::SampleBuilder;
    use crate::domain::{Record, Sifr, SimulatorConfig};
    use crate::models::{OdeModel, Sirf};
    use crate::sim::simulator::integrate;

    fn day0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
    }

    /// Noiseless SIR-F series with `rho` switching at `change` (if any).
    fn sirf_series(days: usize, change: Option<(usize, f64)>) -> ObservedSeries {
        let population = 10_000_000.0;
        let mut state = Sirf.to_state(&Sifr::new(population - 500.0, 500.0, 0.0, 0.0));
        let mut params = vec![0.002, 0.005, 0.2, 0.075];
        let mut records = Vec::with_capacity(days);
        for d in 0..days {
            if let Some((at, rho)) = change {
                if d == at {
                    params[2] = rho;
                }
            }
            let v = Sirf.to_sifr(&state);
            records.push(Record {
                date: day0() + Duration::days(d as i64),
                confirmed: v.confirmed(),
                fatal: v.fatal,
                recovered: v.recovered,
            });
            state = integrate(&Sirf, &state, &params, 1, &SimulatorConfig::default())
                .pop()
                .unwrap();
        }
        ObservedSeries::new("Synthetic", population, records).unwrap()
    }

    #[test]
    fn finds_a_single_regime_change() {
        let s = sirf_series(120, Some((60, 0.05)));
        let seg = detect(&s, s.first_date(), s.last_date(), &SegmenterConfig::default()).unwrap();
        assert_eq!(seg.change_points.len(), 1, "{:?}", seg.change_points);
        let offset = (seg.change_points[0].date - day0()).num_days();
        assert!((57..=63).contains(&offset), "boundary at day {offset}");
        assert!(seg.change_points[0].gain > 0.0);

        let ranges = seg.phase_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, s.first_date());
        assert_eq!(ranges[1].1, s.last_date());
        assert_eq!(ranges[0].1 + Duration::days(1), ranges[1].0);
    }

    fn noisy_sirf_series(change: Option<(usize, f64)>, noise: f64, seed: u64) -> ObservedSeries {
        let mut builder = SampleBuilder::new(Arc::new(Sirf), 10_000_000.0)
            .start(day0())
            .days(120)
            .initial_infected(500.0)
            .regime(0, vec![0.002, 0.005, 0.2, 0.075])
            .noise(noise)
            .seed(seed);
        if let Some((at, rho)) = change {
            builder = builder.regime(at, vec![0.002, 0.005, rho, 0.075]);
        }
        builder.build().unwrap()
    }

    #[test]
    fn noisy_records_keep_a_single_regime_change() {
        for noise in [0.005, 0.01, 0.05] {
            let s = noisy_sirf_series(Some((60, 0.05)), noise, 7);
            let seg = detect(&s, s.first_date(), s.last_date(), &SegmenterConfig::default()).unwrap();
            assert_eq!(seg.change_points.len(), 1, "noise {noise}: {:?}", seg.dates());
            let offset = (seg.change_points[0].date - day0()).num_days();
            assert!((55..=65).contains(&offset), "noise {noise}: boundary at day {offset}");
        }
    }

    #[test]
    fn noisy_constant_dynamics_stay_one_phase() {
        let s = noisy_sirf_series(None, 0.01, 11);
        let seg = detect(&s, s.first_date(), s.last_date(), &SegmenterConfig::default()).unwrap();
        assert!(seg.change_points.is_empty(), "{:?}", seg.dates());
        assert!(seg.noise > 0.0);
    }

    #[test]
    fn constant_dynamics_give_a_single_phase() {
        let s = sirf_series(90, None);
        let seg = detect(&s, s.first_date(), s.last_date(), &SegmenterConfig::default()).unwrap();
        assert!(seg.change_points.is_empty(), "{:?}", seg.change_points);
        assert_eq!(seg.phase_ranges(), vec![(s.first_date(), s.last_date())]);
    }

    #[test]
    fn short_window_is_a_single_phase() {
        let s = sirf_series(5, None);
        let seg = detect(&s, s.first_date(), s.last_date(), &SegmenterConfig::default()).unwrap();
        assert!(seg.change_points.is_empty());
    }

    #[test]
    fn window_must_be_covered() {
        let s = sirf_series(20, None);
        let err = detect(
            &s,
            s.first_date(),
            s.last_date() + Duration::days(3),
            &SegmenterConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::InvalidSeries(_)));
    }

    fn kinked(n: usize, kinks: &[(usize, f64)]) -> LineSums {
        let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut ys = Vec::with_capacity(n);
        let mut y = 0.0;
        for i in 0..n {
            let slope = kinks
                .iter()
                .filter(|(at, _)| i > *at)
                .map(|(_, s)| *s)
                .last()
                .unwrap_or(0.0);
            y += slope;
            ys.push(y);
        }
        LineSums::new(&xs, &ys)
    }

    #[test]
    fn close_boundaries_keep_the_larger_reduction() {
        let sums = kinked(40, &[(20, 0.1), (23, 5.0)]);
        assert_eq!(enforce_min_length(&sums, vec![20, 23], 7), vec![23]);
    }

    #[test]
    fn boundaries_too_close_to_an_edge_are_dropped() {
        let sums = kinked(40, &[(3, 1.0), (20, 3.0)]);
        assert_eq!(enforce_min_length(&sums, vec![3, 20], 7), vec![20]);
        assert_eq!(enforce_min_length(&sums, vec![20, 36], 7), vec![20]);
    }

    #[test]
    fn partition_recovers_exact_kinks() {
        let sums = kinked(60, &[(19, 1.0), (39, 4.0)]);
        let bounds = optimal_partition(&sums, 3, 1e-6);
        assert_eq!(bounds.len(), 2, "{bounds:?}");
        assert!((19..=21).contains(&bounds[0]));
        assert!((39..=41).contains(&bounds[1]));
    }
}
