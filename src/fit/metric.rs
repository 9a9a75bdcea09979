//! Fit quality metrics.

use crate::domain::Metric;

/// Score `simulated` against `observed` on the given state columns.
///
/// Both slices hold one state vector per day and must have the same length.
/// Returns `+inf` for empty input or any non-finite term.
pub fn score(metric: Metric, simulated: &[Vec<f64>], observed: &[Vec<f64>], columns: &[usize]) -> f64 {
    let mut acc = 0.0;
    let mut count = 0usize;
    for (sim, obs) in simulated.iter().zip(observed) {
        for &c in columns {
            let (s, o) = (sim[c], obs[c]);
            acc += match metric {
                Metric::Rmsle => ((1.0 + s.max(0.0)).ln() - (1.0 + o.max(0.0)).ln()).powi(2),
                Metric::Rmsre => ((s - o) / o.abs().max(1.0)).powi(2),
                Metric::Mae => (s - o).abs(),
                Metric::Rmse => (s - o).powi(2),
            };
            count += 1;
        }
    }
    if count == 0 || !acc.is_finite() {
        return f64::INFINITY;
    }
    let mean = acc / count as f64;
    match metric {
        Metric::Mae => mean,
        Metric::Rmsle | Metric::Rmsre | Metric::Rmse => mean.sqrt(),
    }
}
