//! Paired-sample statistics
//!
//! Descriptive moments use the population convention (ddof = 0); effect
//! sizes and the t-test use the sample standard deviation of the
//! differences. Every function returns `None` rather than a number when its
//! sample is too small to define it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, ContinuousCDF, DiscreteCDF, Normal, StudentsT};
use statrs::statistics::Statistics;
use std::cmp::Ordering;

/// Largest sample for which the Wilcoxon test uses the exact null distribution.
pub const WILCOXON_EXACT_MAX: usize = 50;

/// Statistic and two-sided p-value of a test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test statistic
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Descriptive statistics of one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Descriptive {
    /// Sample size
    pub n: usize,
    /// Mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Median
    pub median: f64,
    /// Interquartile range (linear interpolation)
    pub iqr: f64,
    /// Skewness, `None` for a constant series
    pub skewness: Option<f64>,
    /// Excess kurtosis, `None` for a constant series
    pub kurtosis: Option<f64>,
    /// Median absolute deviation
    pub mad: f64,
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Quantile of an ascending slice by linear interpolation.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let t = idx - lo as f64;
    Some(sorted[lo] * (1.0 - t) + sorted[hi] * t)
}

/// Median of a series.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    quantile_sorted(&sorted(values), 0.5)
}

/// Arithmetic mean.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().mean())
}

/// Sample standard deviation (ddof = 1).
#[must_use]
pub fn sample_std(values: &[f64]) -> Option<f64> {
    (values.len() >= 2).then(|| values.iter().std_dev())
}

#[allow(clippy::cast_precision_loss)]
fn central_moment(values: &[f64], mean: f64, k: i32) -> f64 {
    values.iter().map(|v| (v - mean).powi(k)).sum::<f64>() / values.len() as f64
}

/// Descriptive statistics, `None` for an empty series.
#[must_use]
pub fn describe(values: &[f64]) -> Option<Descriptive> {
    let mean = mean(values)?;
    let s = sorted(values);
    let median = quantile_sorted(&s, 0.5)?;
    let iqr = quantile_sorted(&s, 0.75)? - quantile_sorted(&s, 0.25)?;
    let m2 = central_moment(values, mean, 2);
    let (skewness, kurtosis) = if m2 > 0.0 {
        (
            Some(central_moment(values, mean, 3) / m2.powf(1.5)),
            Some(central_moment(values, mean, 4) / (m2 * m2) - 3.0),
        )
    } else {
        (None, None)
    };
    let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    Some(Descriptive {
        n: values.len(),
        mean,
        std: m2.sqrt(),
        median,
        iqr,
        skewness,
        kurtosis,
        mad: median_of(&deviations),
    })
}

fn median_of(values: &[f64]) -> f64 {
    median(values).unwrap_or(f64::NAN)
}

/// Pearson correlation of two equal-length series.
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    (sxx > 0.0 && syy > 0.0).then(|| sxy / (sxx * syy).sqrt())
}

/// Least-squares slope of a series against its index (0, 1, 2, ...).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ols_slope(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mx = (n - 1.0) / 2.0;
    let my = mean(values)?;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, v) in values.iter().enumerate() {
        let dx = i as f64 - mx;
        sxy += dx * (v - my);
        sxx += dx * dx;
    }
    Some(sxy / sxx)
}

/// Cohen's d of paired differences: mean / sample standard deviation.
#[must_use]
pub fn cohens_d(diffs: &[f64]) -> Option<f64> {
    let sd = sample_std(diffs)?;
    (sd > 0.0).then(|| mean(diffs).unwrap_or(0.0) / sd)
}

/// Paired t-test of the differences against zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(diffs: &[f64]) -> Option<TestResult> {
    let sd = sample_std(diffs)?;
    if sd <= 0.0 {
        return None;
    }
    let n = diffs.len() as f64;
    let t = mean(diffs)? / (sd / n.sqrt());
    let dist = StudentsT::new(0.0, 1.0, n - 1.0).ok()?;
    Some(TestResult {
        statistic: t,
        p_value: (2.0 * dist.sf(t.abs())).min(1.0),
    })
}

/// Average ranks (1-based) of `values`, ties sharing their mean rank.
#[allow(clippy::cast_precision_loss)]
fn average_ranks(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].partial_cmp(&values[j]).unwrap_or(Ordering::Equal));
    let mut ranks = vec![0.0; values.len()];
    let mut ties = Vec::new();
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j + 2) as f64 / 2.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        if j > i {
            ties.push(j - i + 1);
        }
        i = j + 1;
    }
    (ranks, ties)
}

/// Wilcoxon signed-rank test. Zero differences are dropped; the exact null
/// distribution is used for small tie-free samples, the normal
/// approximation with tie correction otherwise.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn wilcoxon(diffs: &[f64]) -> Option<TestResult> {
    let nonzero: Vec<f64> = diffs.iter().copied().filter(|d| *d != 0.0).collect();
    let n = nonzero.len();
    if n == 0 {
        return None;
    }
    let magnitudes: Vec<f64> = nonzero.iter().map(|d| d.abs()).collect();
    let (ranks, ties) = average_ranks(&magnitudes);
    let w_plus: f64 = nonzero
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let total = (n * (n + 1)) as f64 / 2.0;
    let statistic = w_plus.min(total - w_plus);

    let p_value = if n <= WILCOXON_EXACT_MAX && ties.is_empty() {
        // counts[s] = number of sign assignments with W+ = s
        let max = n * (n + 1) / 2;
        let mut counts = vec![0.0_f64; max + 1];
        counts[0] = 1.0;
        for k in 1..=n {
            for s in (k..=max).rev() {
                counts[s] += counts[s - k];
            }
        }
        let all: f64 = counts.iter().sum();
        let w = w_plus.round() as usize;
        let lower: f64 = counts[..=w].iter().sum::<f64>() / all;
        let upper: f64 = counts[w..].iter().sum::<f64>() / all;
        (2.0 * lower.min(upper)).min(1.0)
    } else {
        let nf = n as f64;
        let tie_term: f64 = ties.iter().map(|&t| (t * t * t - t) as f64).sum::<f64>() / 48.0;
        let var = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term;
        if var <= 0.0 {
            return None;
        }
        let z = (w_plus - total / 2.0) / var.sqrt();
        let normal = Normal::new(0.0, 1.0).ok()?;
        (2.0 * normal.sf(z.abs())).min(1.0)
    };
    Some(TestResult { statistic, p_value })
}

/// Two-sided binomial sign test of the differences (zeros dropped).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sign_test(diffs: &[f64]) -> Option<TestResult> {
    let positive = diffs.iter().filter(|d| **d > 0.0).count() as u64;
    let negative = diffs.iter().filter(|d| **d < 0.0).count() as u64;
    let n = positive + negative;
    if n == 0 {
        return None;
    }
    let binomial = Binomial::new(0.5, n).ok()?;
    let k = positive.min(negative);
    Some(TestResult {
        statistic: positive as f64,
        p_value: (2.0 * binomial.cdf(k)).min(1.0),
    })
}

/// Percentile bootstrap interval of the mean.
///
/// `level` is the two-sided coverage (0.95 → 2.5th and 97.5th percentiles).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bootstrap_mean_ci(values: &[f64], rounds: usize, level: f64, seed: u64) -> Option<(f64, f64)> {
    if values.len() < 2 || rounds == 0 {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let n = values.len();
    let mut means: Vec<f64> = (0..rounds)
        .map(|_| (0..n).map(|_| values[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let tail = (1.0 - level) / 2.0;
    Some((quantile_sorted(&means, tail)?, quantile_sorted(&means, 1.0 - tail)?))
}

/// Benjamini-Hochberg adjusted p-values (q-values), in input order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let m = pvalues.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| {
        pvalues[i]
            .partial_cmp(&pvalues[j])
            .unwrap_or(Ordering::Equal)
            .then(i.cmp(&j))
    });
    let mut q = vec![1.0; m];
    let mut prev = 1.0_f64;
    for (rank0, &idx) in order.iter().enumerate().rev() {
        let adjusted = (pvalues[idx] * m as f64 / (rank0 + 1) as f64).min(1.0);
        prev = prev.min(adjusted);
        q[idx] = prev;
    }
    q
}
