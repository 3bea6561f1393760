//! Two-experiment comparison
//!
//! Pairs the cycles of two experiments by cycle time and, for every metric
//! and every key present in both, runs the paired statistics of
//! [`stats`] on the per-cycle series. Differences are always B − A.

pub mod stats;

use crate::experiment::Experiment;
use crate::impact::{ImpactAggregator, ImpactKey, ImpactSummary, KeyImpact};
use crate::merge::MergedCycle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stats::{Descriptive, TestResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, info_span, warn};

/// Per-cycle quantity compared between experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Total impact of the key
    TotalImpact,
    /// Fractional impact of the key (percent)
    FractionalImpact,
    /// Mean O-B of included records
    MeanOmf,
    /// Mean O-A of included records
    MeanOma,
    /// Number of assimilated records
    AssimilatedCount,
}

impl Metric {
    /// Every metric
    pub const ALL: [Self; 5] = [
        Self::TotalImpact,
        Self::FractionalImpact,
        Self::MeanOmf,
        Self::MeanOma,
        Self::AssimilatedCount,
    ];

    /// Value of the metric for one key of one cycle.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn extract(self, key: &KeyImpact) -> Option<f64> {
        match self {
            Self::TotalImpact => (key.impact_records > 0).then_some(key.total_impact),
            Self::FractionalImpact => key.fractional_impact,
            Self::MeanOmf => key.mean_omf,
            Self::MeanOma => key.mean_oma,
            Self::AssimilatedCount => Some(key.assimilated() as f64),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TotalImpact => "total_impact",
            Self::FractionalImpact => "fractional_impact",
            Self::MeanOmf => "mean_omf",
            Self::MeanOma => "mean_oma",
            Self::AssimilatedCount => "assimilated_count",
        })
    }
}

/// Outcome class of one key's comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// Every statistic was computed
    Complete,
    /// Fewer than two paired cycles; only descriptive statistics
    InsufficientData,
    /// The differences are constant; t-test and effect size skipped
    ZeroVariance,
}

/// OLS slopes against cycle index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Slope of series A
    pub a: Option<f64>,
    /// Slope of series B
    pub b: Option<f64>,
    /// Slope of B − A
    pub diff: Option<f64>,
}

/// Paired comparison of one key for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyComparison {
    /// Aggregation key
    pub key: ImpactKey,
    /// Outcome class
    pub status: ComparisonStatus,
    /// Cycles where both experiments had a value
    pub cycles: Vec<DateTime<Utc>>,
    /// Series of experiment A
    pub a: Vec<f64>,
    /// Series of experiment B
    pub b: Vec<f64>,
    /// Descriptive statistics of A
    pub describe_a: Option<Descriptive>,
    /// Descriptive statistics of B
    pub describe_b: Option<Descriptive>,
    /// Descriptive statistics of B − A
    pub describe_diff: Option<Descriptive>,
    /// Share of cycles with B > A (percent)
    pub percent_b_greater: Option<f64>,
    /// Pearson correlation of A and B
    pub pearson: Option<f64>,
    /// Cohen's d of B − A
    pub effect_size: Option<f64>,
    /// Bootstrap interval of the mean difference
    pub confidence_interval: Option<(f64, f64)>,
    /// Paired t-test
    pub t_test: Option<TestResult>,
    /// Wilcoxon signed-rank test
    pub wilcoxon: Option<TestResult>,
    /// Binomial sign test
    pub sign_test: Option<TestResult>,
    /// Trend slopes
    pub trend: Trend,
    /// BH-adjusted t-test p-value
    pub t_q_value: Option<f64>,
    /// BH-adjusted Wilcoxon p-value
    pub wilcoxon_q_value: Option<f64>,
    /// t-test significant after adjustment
    pub significant_t: bool,
    /// Wilcoxon significant after adjustment
    pub significant_wilcoxon: bool,
}

impl KeyComparison {
    /// Number of paired cycles
    #[must_use]
    pub fn n(&self) -> usize {
        self.a.len()
    }

    /// Mean of B − A
    #[must_use]
    pub fn mean_difference(&self) -> Option<f64> {
        self.describe_diff.map(|d| d.mean)
    }
}

/// All keys of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    /// Compared metric
    pub metric: Metric,
    /// Per-key results, ordered by key
    pub keys: Vec<KeyComparison>,
}

impl MetricComparison {
    /// Result for one key
    #[must_use]
    pub fn get(&self, key: impl Into<ImpactKey>) -> Option<&KeyComparison> {
        let key = key.into();
        self.keys.iter().find(|k| k.key == key)
    }
}

/// Result of comparing two experiments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Name of experiment A
    pub experiment_a: String,
    /// Name of experiment B
    pub experiment_b: String,
    /// Cycle times present in both experiments
    pub paired_cycles: Vec<DateTime<Utc>>,
    /// Cycle times only in A
    pub unmatched_a: Vec<DateTime<Utc>>,
    /// Cycle times only in B
    pub unmatched_b: Vec<DateTime<Utc>>,
    /// One entry per requested metric
    pub metrics: Vec<MetricComparison>,
}

impl Comparison {
    /// Results of one metric
    #[must_use]
    pub fn metric(&self, metric: Metric) -> Option<&MetricComparison> {
        self.metrics.iter().find(|m| m.metric == metric)
    }
}

/// Compares two experiments cycle by cycle.
#[derive(Debug, Clone)]
pub struct ExperimentComparator {
    aggregator: ImpactAggregator,
    metrics: Vec<Metric>,
    bootstrap_rounds: usize,
    confidence_level: f64,
    significance: f64,
    seed: u64,
}

impl Default for ExperimentComparator {
    fn default() -> Self {
        Self {
            aggregator: ImpactAggregator::default(),
            metrics: Metric::ALL.to_vec(),
            bootstrap_rounds: 1000,
            confidence_level: 0.95,
            significance: 0.05,
            seed: 42,
        }
    }
}

impl ExperimentComparator {
    /// Comparator over every metric with 1000 bootstrap rounds, a 95%
    /// interval and a 0.05 significance level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the aggregator producing per-cycle summaries.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: ImpactAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Restrict the compared metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: impl IntoIterator<Item = Metric>) -> Self {
        self.metrics = metrics.into_iter().collect();
        self
    }

    /// Set bootstrap rounds and interval coverage.
    #[must_use]
    pub const fn with_bootstrap(mut self, rounds: usize, confidence_level: f64) -> Self {
        self.bootstrap_rounds = rounds;
        self.confidence_level = confidence_level;
        self
    }

    /// Set the significance level applied to adjusted p-values.
    #[must_use]
    pub const fn with_significance(mut self, alpha: f64) -> Self {
        self.significance = alpha;
        self
    }

    /// Set the bootstrap RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Compare experiment `b` against experiment `a`.
    #[must_use]
    pub fn compare(&self, a: &Experiment, b: &Experiment) -> Comparison {
        let span = info_span!("compare", a = a.name(), b = b.name());
        let _guard = span.enter();

        let per_a = self.per_cycle(a.cycles());
        let per_b = self.per_cycle(b.cycles());
        let paired: Vec<DateTime<Utc>> = per_a.keys().filter(|t| per_b.contains_key(t)).copied().collect();
        let unmatched_a: Vec<DateTime<Utc>> = per_a.keys().filter(|t| !per_b.contains_key(t)).copied().collect();
        let unmatched_b: Vec<DateTime<Utc>> = per_b.keys().filter(|t| !per_a.contains_key(t)).copied().collect();
        if !unmatched_a.is_empty() || !unmatched_b.is_empty() {
            warn!(
                only_a = unmatched_a.len(),
                only_b = unmatched_b.len(),
                "cycles without a counterpart excluded"
            );
        }

        let keys_a: BTreeSet<&ImpactKey> = per_a.values().flat_map(|s| s.keys().iter().map(|k| &k.key)).collect();
        let keys_b: BTreeSet<&ImpactKey> = per_b.values().flat_map(|s| s.keys().iter().map(|k| &k.key)).collect();
        let shared: Vec<&ImpactKey> = keys_a.intersection(&keys_b).copied().collect();

        let metrics = self
            .metrics
            .iter()
            .map(|&metric| {
                let mut keys: Vec<KeyComparison> = shared
                    .iter()
                    .map(|key| {
                        let (cycles, xs, ys) = series(metric, key, &paired, &per_a, &per_b);
                        self.compare_series((*key).clone(), cycles, xs, ys)
                    })
                    .collect();
                self.adjust(&mut keys);
                MetricComparison { metric, keys }
            })
            .collect();

        info!(paired = paired.len(), keys = shared.len(), "comparison finished");
        Comparison {
            experiment_a: a.name().to_string(),
            experiment_b: b.name().to_string(),
            paired_cycles: paired,
            unmatched_a,
            unmatched_b,
            metrics,
        }
    }

    /// One summary per distinct cycle time; repeated times aggregate together.
    /// `cycles` must be ordered by cycle time.
    fn per_cycle(&self, cycles: &[MergedCycle]) -> BTreeMap<DateTime<Utc>, ImpactSummary> {
        let mut out = BTreeMap::new();
        let mut start = 0;
        while start < cycles.len() {
            let time = cycles[start].cycle();
            let end = start + cycles[start..].iter().take_while(|c| c.cycle() == time).count();
            out.insert(time, self.aggregator.aggregate(&cycles[start..end]));
            start = end;
        }
        out
    }

    /// Paired statistics of one key's series.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compare_series(
        &self,
        key: impl Into<ImpactKey>,
        cycles: Vec<DateTime<Utc>>,
        a: Vec<f64>,
        b: Vec<f64>,
    ) -> KeyComparison {
        let diffs: Vec<f64> = a.iter().zip(&b).map(|(x, y)| y - x).collect();
        let n = diffs.len();
        let mut result = KeyComparison {
            key: key.into(),
            status: ComparisonStatus::InsufficientData,
            cycles,
            describe_a: stats::describe(&a),
            describe_b: stats::describe(&b),
            describe_diff: stats::describe(&diffs),
            percent_b_greater: (n > 0).then(|| diffs.iter().filter(|d| **d > 0.0).count() as f64 / n as f64 * 100.0),
            pearson: None,
            effect_size: None,
            confidence_interval: None,
            t_test: None,
            wilcoxon: None,
            sign_test: None,
            trend: Trend::default(),
            t_q_value: None,
            wilcoxon_q_value: None,
            significant_t: false,
            significant_wilcoxon: false,
            a,
            b,
        };
        if n < 2 {
            return result;
        }

        let zero_variance = stats::sample_std(&diffs).is_some_and(|sd| sd == 0.0);
        result.status = if zero_variance {
            ComparisonStatus::ZeroVariance
        } else {
            ComparisonStatus::Complete
        };
        result.pearson = stats::pearson(&result.a, &result.b);
        result.confidence_interval =
            stats::bootstrap_mean_ci(&diffs, self.bootstrap_rounds, self.confidence_level, self.seed);
        result.wilcoxon = stats::wilcoxon(&diffs);
        result.sign_test = stats::sign_test(&diffs);
        result.trend = Trend {
            a: stats::ols_slope(&result.a),
            b: stats::ols_slope(&result.b),
            diff: stats::ols_slope(&diffs),
        };
        if !zero_variance {
            result.effect_size = stats::cohens_d(&diffs);
            result.t_test = stats::paired_t_test(&diffs);
        }
        result
    }

    /// Benjamini-Hochberg adjustment across keys; a missing p-value counts as 1.
    fn adjust(&self, keys: &mut [KeyComparison]) {
        let t: Vec<f64> = keys.iter().map(|k| k.t_test.map_or(1.0, |r| r.p_value)).collect();
        let w: Vec<f64> = keys.iter().map(|k| k.wilcoxon.map_or(1.0, |r| r.p_value)).collect();
        let qt = stats::benjamini_hochberg(&t);
        let qw = stats::benjamini_hochberg(&w);
        for ((k, qt), qw) in keys.iter_mut().zip(qt).zip(qw) {
            if k.t_test.is_some() {
                k.t_q_value = Some(qt);
                k.significant_t = qt < self.significance;
            }
            if k.wilcoxon.is_some() {
                k.wilcoxon_q_value = Some(qw);
                k.significant_wilcoxon = qw < self.significance;
            }
        }
    }
}

type Series = (Vec<DateTime<Utc>>, Vec<f64>, Vec<f64>);

fn series(
    metric: Metric,
    key: &ImpactKey,
    paired: &[DateTime<Utc>],
    per_a: &BTreeMap<DateTime<Utc>, ImpactSummary>,
    per_b: &BTreeMap<DateTime<Utc>, ImpactSummary>,
) -> Series {
    let mut out: Series = (Vec::new(), Vec::new(), Vec::new());
    for t in paired {
        let value = |m: &BTreeMap<DateTime<Utc>, ImpactSummary>| m.get(t).and_then(|s| s.get(key)).and_then(|k| metric.extract(k));
        if let (Some(x), Some(y)) = (value(per_a), value(per_b)) {
            out.0.push(*t);
            out.1.push(x);
            out.2.push(y);
        }
    }
    out
}
