//! Robust statistics without RNG (deterministic).

pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Gaussian-consistent scale estimate from the median absolute deviation.
pub fn mad_sigma(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let med = median_mut(&mut finite)?;
    let mut dev: Vec<f64> = finite.iter().map(|v| (v - med).abs()).collect();
    median_mut(&mut dev).map(|mad| mad / 0.6745)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median_mut(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_mut(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median_mut(&mut []), None);
    }

    #[test]
    fn mad_ignores_a_single_outlier() {
        let sigma = mad_sigma(&[1.0, -1.0, 1.0, -1.0, 1.0, 1000.0]).unwrap();
        assert!((sigma - 1.0 / 0.6745).abs() < 1e-9);
    }
}
