//! Least squares helpers.
//!
//! Two users:
//! - the trend predictor regresses each parameter on its phase index
//!   (`linear_fit`)
//! - the change-point search needs the SSE of a straight-line fit on many
//!   sub-ranges, which `LineSums` answers in O(1) from prefix sums, and the
//!   residuals of its first partition (`linear_fit`)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Fit `y = a + b x`, returning `(a, b)`.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mut design = DMatrix::<f64>::zeros(xs.len(), 2);
    for (i, &x) in xs.iter().enumerate() {
        design[(i, 0)] = 1.0;
        design[(i, 1)] = x;
    }
    let y = DVector::from_row_slice(ys);
    let beta = solve_least_squares(&design, &y)?;
    Some((beta[0], beta[1]))
}

/// Prefix sums answering "SSE of the best straight line through points
/// `i..j`" in constant time, optionally with per-point weights.
#[derive(Debug, Clone)]
pub struct LineSums {
    sw: Vec<f64>,
    sx: Vec<f64>,
    sy: Vec<f64>,
    sxx: Vec<f64>,
    sxy: Vec<f64>,
    syy: Vec<f64>,
}

impl LineSums {
    pub fn new(xs: &[f64], ys: &[f64]) -> Self {
        Self::weighted(xs, ys, &vec![1.0; xs.len().min(ys.len())])
    }

    /// Weighted sums; `sse` then returns the weighted SSE.
    pub fn weighted(xs: &[f64], ys: &[f64], ws: &[f64]) -> Self {
        let n = xs.len().min(ys.len()).min(ws.len());
        let mut sums = Self {
            sw: vec![0.0; n + 1],
            sx: vec![0.0; n + 1],
            sy: vec![0.0; n + 1],
            sxx: vec![0.0; n + 1],
            sxy: vec![0.0; n + 1],
            syy: vec![0.0; n + 1],
        };
        for i in 0..n {
            let (x, y, w) = (xs[i], ys[i], ws[i]);
            sums.sw[i + 1] = sums.sw[i] + w;
            sums.sx[i + 1] = sums.sx[i] + w * x;
            sums.sy[i + 1] = sums.sy[i] + w * y;
            sums.sxx[i + 1] = sums.sxx[i] + w * x * x;
            sums.sxy[i + 1] = sums.sxy[i] + w * x * y;
            sums.syy[i + 1] = sums.syy[i] + w * y * y;
        }
        sums
    }

    pub fn len(&self) -> usize {
        self.sx.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SSE of the least squares line through points `start..end` (half-open).
    ///
    /// Degenerate x ranges fall back to the SSE around the mean.
    pub fn sse(&self, start: usize, end: usize) -> f64 {
        if end <= start + 1 {
            return 0.0;
        }
        let w = self.sw[end] - self.sw[start];
        if w <= 0.0 {
            return 0.0;
        }
        let sx = self.sx[end] - self.sx[start];
        let sy = self.sy[end] - self.sy[start];
        let sxx = self.sxx[end] - self.sxx[start];
        let sxy = self.sxy[end] - self.sxy[start];
        let syy = self.syy[end] - self.syy[start];

        let vxx = sxx - sx * sx / w;
        let vxy = sxy - sx * sy / w;
        let vyy = syy - sy * sy / w;
        let sse = if vxx > 1e-12 * (sxx.abs() + 1.0) {
            vyy - vxy * vxy / vxx
        } else {
            vyy
        };
        sse.max(0.0)
    }
}
