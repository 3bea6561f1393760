//! Compensated summation

/// Neumaier (improved Kahan) running sum.
///
/// Partial sums from parallel workers combine with [`CompensatedSum::merge`]
/// without losing the carried error term.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    /// Empty sum
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sum: 0.0,
            compensation: 0.0,
        }
    }

    /// Add one value.
    pub fn add(&mut self, value: f64) {
        // Once non-finite, the sum stays non-finite and compensation is frozen.
        if !value.is_finite() || !self.sum.is_finite() {
            self.sum += value;
            return;
        }
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    /// Fold another partial sum into this one.
    pub fn merge(&mut self, other: &Self) {
        self.add(other.sum);
        self.add(other.compensation);
    }

    /// Current total
    #[must_use]
    pub fn value(&self) -> f64 {
        if self.sum.is_finite() {
            self.sum + self.compensation
        } else {
            self.sum
        }
    }
}

impl FromIterator<f64> for CompensatedSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut sum = Self::new();
        for v in iter {
            sum.add(v);
        }
        sum
    }
}

impl Extend<f64> for CompensatedSum {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for v in iter {
            self.add(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_recovers_small_terms() {
        let sum: CompensatedSum = [1.0, 1e100, 1.0, -1e100].into_iter().collect();
        assert!((sum.value() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let values: Vec<f64> = (0..1000).map(|i| 0.1 * f64::from(i)).collect();
        let whole: CompensatedSum = values.iter().copied().collect();
        let mut left: CompensatedSum = values[..400].iter().copied().collect();
        let right: CompensatedSum = values[400..].iter().copied().collect();
        left.merge(&right);
        assert!((whole.value() - left.value()).abs() < 1e-9);
    }

    #[test]
    fn test_nan_propagates() {
        let sum: CompensatedSum = [1.0, f64::NAN].into_iter().collect();
        assert!(sum.value().is_nan());
    }

    proptest! {
        #[test]
        fn prop_close_to_naive(values in prop::collection::vec(-1e6f64..1e6, 0..200)) {
            let naive: f64 = values.iter().sum();
            let sum: CompensatedSum = values.iter().copied().collect();
            prop_assert!((sum.value() - naive).abs() <= 1e-6 * (1.0 + naive.abs()));
        }
    }
}
