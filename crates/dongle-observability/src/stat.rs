//! Incremental mean and sample variance.

use serde::{Deserialize, Serialize};

/// Running mean / sample-variance accumulator.
///
/// The variance update uses the orthogonality identity
/// `(n-1)·s'² = (n-2)·s² + (n-1)·(μ₀-μ)² + (x-μ)²`, so no sample history
/// is kept.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunningStat {
    pub n: u64,
    pub mu: f64,
    pub var: f64,
    pub sigma: f64,
}

impl RunningStat {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            n: 0,
            mu: 0.0,
            var: 0.0,
            sigma: 0.0,
        }
    }

    /// Fold one sample into the accumulator.
    pub fn add(&mut self, value: f64) {
        let n = self.n as f64;
        let mu_0 = self.mu;
        self.mu = self.mu.mul_add(n, value) / (n + 1.0);
        self.var = if self.n > 0 {
            ((n - 1.0).mul_add(self.var, n * (mu_0 - self.mu).powi(2)) + (value - self.mu).powi(2))
                / n
        } else {
            (value - self.mu).powi(2) / (n + 1.0)
        };
        self.sigma = self.var.sqrt();
        self.n += 1;
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.n
    }

    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mu
    }

    #[must_use]
    pub const fn std_dev(&self) -> f64 {
        self.sigma
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_empty_stat() {
        let stat = RunningStat::new();
        assert_eq!(stat.count(), 0);
        assert_eq!(stat.mean(), 0.0);
        assert_eq!(stat.std_dev(), 0.0);
    }

    #[test]
    fn test_single_sample_has_zero_variance() {
        let mut stat = RunningStat::new();
        stat.add(-60.0);
        assert_eq!(stat.count(), 1);
        assert_eq!(stat.mean(), -60.0);
        assert_eq!(stat.var, 0.0);
    }

    #[test]
    fn test_known_sample_variance() {
        let mut stat = RunningStat::new();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stat.add(value);
        }
        assert!((stat.mean() - 5.0).abs() < 1e-12, "case=mean");
        // Sample variance of this set is 32 / 7.
        assert!((stat.var - 32.0 / 7.0).abs() < 1e-9, "case=variance var={}", stat.var);
    }

    proptest! {
        #[test]
        fn prop_matches_two_pass_computation(values in prop::collection::vec(-100.0_f64..100.0, 2..64)) {
            let mut stat = RunningStat::new();
            for &v in &values {
                stat.add(v);
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            prop_assert!((stat.mean() - mean).abs() < 1e-6);
            prop_assert!((stat.var - var).abs() < 1e-6 * var.max(1.0));
        }
    }
}
