//! Small numeric helpers: medians, the allele contrast statistic and an
//! online mean/variance accumulator.

use log::warn;

/// Median of a slice of intensities. Returns `None` for an empty slice or when
/// any value is NaN.
pub fn median(values: &[f32]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}

/// Hyperbolic-sine contrast of two allele signals, `sinh(K*(A-B)/(A+B)) / sinh(K)`.
///
/// Lies in [-1, 1]: +1 is pure A signal, -1 pure B. Returns `None` when the
/// total signal is not positive or either input is not finite.
pub fn contrast(a: f64, b: f64, k: f64) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() || k <= 0.0 {
        return None;
    }
    let total = a + b;
    if total <= 0.0 {
        return None;
    }
    Some((k * (a - b) / total).sinh() / k.sinh())
}

/// Welford's online algorithm for mean and sample variance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the pushed values, 0 when nothing was pushed.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation (n - 1 denominator).
    ///
    /// Fewer than two observations yield 0.0 and a warning rather than NaN.
    pub fn stdev(&self) -> f64 {
        if self.count < 2 {
            warn!(
                "Standard deviation requested from {} observation(s); reporting 0.",
                self.count
            );
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[1.0, f32::NAN]), None);
    }

    #[test]
    fn test_contrast_range_and_sign() {
        let pure_a = contrast(100.0, 0.0, 2.0).unwrap();
        let pure_b = contrast(0.0, 100.0, 2.0).unwrap();
        let balanced = contrast(50.0, 50.0, 2.0).unwrap();
        assert!((pure_a - 1.0).abs() < 1e-12);
        assert!((pure_b + 1.0).abs() < 1e-12);
        assert!(balanced.abs() < 1e-12);
        assert!(contrast(0.0, 0.0, 2.0).is_none());
        assert!(contrast(f64::NAN, 1.0, 2.0).is_none());
    }

    #[test]
    fn test_running_stats_matches_closed_form() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = RunningStats::new();
        for v in values {
            stats.push(v);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert!((stats.mean() - mean).abs() < 1e-5);
        assert!((stats.stdev() - var.sqrt()).abs() < 1e-5);
        assert_eq!(stats.count(), 8);
    }

    #[test]
    fn test_single_observation_stdev_is_zero() {
        let mut stats = RunningStats::new();
        stats.push(3.5);
        assert_eq!(stats.stdev(), 0.0);
        assert_eq!(stats.mean(), 3.5);
        assert_eq!(RunningStats::new().stdev(), 0.0);
    }
}
