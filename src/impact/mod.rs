//! Observation impact aggregation
//!
//! Folds merged cycles into per-key impact summaries, one key per
//! (variable, type code) and, for radiance, per channel: class counts,
//! Total Impact, Fractional Impact and Fractional Background Impact.
//! Classification, inclusion, the impact source and the fraction
//! normalization are all pluggable.
//!
//! ```rust
//! use diag_impact::impact::{FractionKind, ImpactAggregator, ImpactSource};
//!
//! let aggregator = ImpactAggregator::new()
//!     .with_source(ImpactSource::Innovation)
//!     .with_fraction_policy(FractionKind::AbsoluteShare.policy());
//! let summary = aggregator.aggregate(&[]);
//! assert!(summary.keys().is_empty());
//! assert_eq!(summary.policy(), "absolute_share");
//! ```

mod classify;
mod fraction;
mod sum;

pub use classify::{ClassCounts, Classifier, GsiClassifier, Inclusion, ObservationClass};
pub use fraction::{AbsoluteShare, FractionKind, FractionPolicy, Fractions, KeyTotals, LegacyShare, SignedShare};
pub use sum::CompensatedSum;

use crate::merge::{MergedCycle, MergedRecord};
use crate::schema::Field;
use crate::table::{BlockKey, ColumnSet};
use crate::Result;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Where a key's impact values come from.
///
/// The source is fixed per key: a key's Total Impact never mixes stored
/// impact values with innovation-derived ones. Records without a value from
/// the chosen source are excluded and counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSource {
    /// The per-observation impact field written by the analysis
    #[default]
    Field,
    /// Σ (oma² − omf²) · errinv² over the record's components
    Innovation,
    /// The impact field for keys where any included record carries it,
    /// the innovation value for the others
    Auto,
}

impl ImpactSource {
    /// Source actually used for a key whose included records carried
    /// `field_records` impact values.
    #[must_use]
    pub const fn resolve(self, field_records: usize) -> Self {
        match self {
            Self::Auto if field_records > 0 => Self::Field,
            Self::Auto => Self::Innovation,
            other => other,
        }
    }

    const fn wants_field(self) -> bool {
        !matches!(self, Self::Innovation)
    }

    const fn wants_innovation(self) -> bool {
        !matches!(self, Self::Field)
    }
}

/// Innovation-derived impact, summed over both wind components for `uv`.
///
/// Defined only when the inverse error is finite and positive and at least
/// one component has both innovations.
#[must_use]
pub fn innovation_impact(record: &MergedRecord) -> Option<f64> {
    let errinv = record.inverse_error().filter(|e| e.is_finite() && *e > 0.0)?;
    let weight = errinv * errinv;
    let mut total: Option<f64> = None;
    for (omf, oma) in [(record.omf(), record.oma()), (record.omf_v(), record.oma_v())] {
        if let (Some(f), Some(a)) = (omf, oma) {
            if f.is_finite() && a.is_finite() {
                *total.get_or_insert(0.0) += (a * a - f * f) * weight;
            }
        }
    }
    total
}

/// Aggregation key: a block key, split by channel for radiance blocks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImpactKey {
    /// Block the records came from
    pub block: BlockKey,
    /// Channel number, `None` for conventional blocks
    pub channel: Option<i32>,
}

impl ImpactKey {
    /// Key for a whole block
    #[must_use]
    pub const fn block(block: BlockKey) -> Self {
        Self { block, channel: None }
    }

    /// Key for one channel of a radiance block
    #[must_use]
    pub const fn channel(block: BlockKey, channel: i32) -> Self {
        Self {
            block,
            channel: Some(channel),
        }
    }
}

impl From<BlockKey> for ImpactKey {
    fn from(block: BlockKey) -> Self {
        Self::block(block)
    }
}

impl From<&BlockKey> for ImpactKey {
    fn from(block: &BlockKey) -> Self {
        Self::block(block.clone())
    }
}

impl From<&Self> for ImpactKey {
    fn from(key: &Self) -> Self {
        key.clone()
    }
}

impl fmt::Display for ImpactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Some(ch) => write!(f, "{}/ch{ch}", self.block),
            None => write!(f, "{}", self.block),
        }
    }
}

/// Aggregated impact of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyImpact {
    /// Aggregation key
    pub key: ImpactKey,
    /// Record counts per class
    pub counts: ClassCounts,
    /// Records selected by the inclusion rule
    pub included: usize,
    /// Sum of per-record impact over included records
    pub total_impact: f64,
    /// Included records that contributed an impact value
    pub impact_records: usize,
    /// Included records excluded for a missing impact value
    pub excluded_impact: usize,
    /// Source the key's impact values came from
    pub impact_source: ImpactSource,
    /// Sum of DFS over included records, if any carried one
    pub dfs: Option<f64>,
    /// Included records excluded for a missing DFS value
    pub excluded_dfs: usize,
    /// Fractional impact (percent)
    pub fractional_impact: Option<f64>,
    /// Fractional background impact (percent)
    pub fractional_background_impact: Option<f64>,
    /// Compensated sum of O-B over included records
    pub sum_omf: f64,
    /// Compensated sum of O-A over included records
    pub sum_oma: f64,
    /// Mean O-B of included records
    pub mean_omf: Option<f64>,
    /// Mean O-A of included records
    pub mean_oma: Option<f64>,
}

impl KeyImpact {
    /// Records counted as assimilated
    #[must_use]
    pub const fn assimilated(&self) -> usize {
        self.counts.get(ObservationClass::Assimilated)
    }
}

/// Impact of every key over a set of cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    cycles: Vec<DateTime<Utc>>,
    policy: String,
    keys: Vec<KeyImpact>,
    total_impact: f64,
    total_dfs: Option<f64>,
}

impl ImpactSummary {
    /// Cycle times covered, ascending
    #[must_use]
    pub fn cycles(&self) -> &[DateTime<Utc>] {
        &self.cycles
    }

    /// Fraction policy used
    #[must_use]
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Per-key results, ordered by key
    #[must_use]
    pub fn keys(&self) -> &[KeyImpact] {
        &self.keys
    }

    /// Result for one key; a plain [`BlockKey`] selects the channel-less key.
    #[must_use]
    pub fn get(&self, key: impl Into<ImpactKey>) -> Option<&KeyImpact> {
        let key = key.into();
        self.keys
            .binary_search_by(|k| k.key.cmp(&key))
            .ok()
            .map(|i| &self.keys[i])
    }

    /// Total impact over all keys
    #[must_use]
    pub const fn total_impact(&self) -> f64 {
        self.total_impact
    }

    /// Total DFS over all keys
    #[must_use]
    pub const fn total_dfs(&self) -> Option<f64> {
        self.total_dfs
    }

    /// Export one row per key as an Arrow `RecordBatch`.
    ///
    /// # Errors
    ///
    /// Returns an error if Arrow rejects the assembled columns.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut set = ColumnSet::default();
        set.utf8("variable", self.keys.iter().map(|k| Some(k.key.block.variable.clone())).collect());
        set.utf8("type_code", self.keys.iter().map(|k| Some(k.key.block.type_code.to_string())).collect());
        set.int("channel", self.keys.iter().map(|k| k.key.channel).collect());
        for class in ObservationClass::ALL {
            set.count(
                &class.to_string().replace('-', "_"),
                self.keys.iter().map(|k| k.counts.get(class) as u64).collect(),
            );
        }
        set.count("unclassified", self.keys.iter().map(|k| k.counts.unclassified() as u64).collect());
        set.float("total_impact", self.keys.iter().map(|k| Some(k.total_impact)).collect());
        set.float("fi", self.keys.iter().map(|k| k.fractional_impact).collect());
        set.float("fbi", self.keys.iter().map(|k| k.fractional_background_impact).collect());
        set.float("dfs", self.keys.iter().map(|k| k.dfs).collect());
        set.float("sum_omf", self.keys.iter().map(|k| Some(k.sum_omf)).collect());
        set.float("sum_oma", self.keys.iter().map(|k| Some(k.sum_oma)).collect());
        set.float("mean_omf", self.keys.iter().map(|k| k.mean_omf).collect());
        set.float("mean_oma", self.keys.iter().map(|k| k.mean_oma).collect());
        set.finish()
    }
}

#[derive(Debug, Clone, Default)]
struct KeyAccumulator {
    counts: ClassCounts,
    included: usize,
    field: CompensatedSum,
    field_records: usize,
    innovation: CompensatedSum,
    innovation_records: usize,
    dfs: CompensatedSum,
    dfs_records: usize,
    omf: CompensatedSum,
    omf_records: usize,
    oma: CompensatedSum,
    oma_records: usize,
}

impl KeyAccumulator {
    /// Impact sum and contributing records of the resolved source.
    const fn impact(&self, source: ImpactSource) -> (&CompensatedSum, usize) {
        match source {
            ImpactSource::Innovation => (&self.innovation, self.innovation_records),
            _ => (&self.field, self.field_records),
        }
    }

    fn merge(&mut self, other: &Self) {
        self.counts.merge(&other.counts);
        self.included += other.included;
        self.field.merge(&other.field);
        self.field_records += other.field_records;
        self.innovation.merge(&other.innovation);
        self.innovation_records += other.innovation_records;
        self.dfs.merge(&other.dfs);
        self.dfs_records += other.dfs_records;
        self.omf.merge(&other.omf);
        self.omf_records += other.omf_records;
        self.oma.merge(&other.oma);
        self.oma_records += other.oma_records;
    }
}

type Partial = BTreeMap<ImpactKey, KeyAccumulator>;

fn merge_partials(mut a: Partial, b: Partial) -> Partial {
    for (key, acc) in b {
        a.entry(key).or_default().merge(&acc);
    }
    a
}

#[allow(clippy::cast_precision_loss)]
fn mean(sum: &CompensatedSum, n: usize) -> Option<f64> {
    (n > 0).then(|| sum.value() / n as f64)
}

/// Folds merged cycles into impact summaries.
#[derive(Debug, Clone)]
pub struct ImpactAggregator {
    classifier: Arc<dyn Classifier>,
    inclusion: Inclusion,
    source: ImpactSource,
    fraction: Arc<dyn FractionPolicy>,
}

impl Default for ImpactAggregator {
    fn default() -> Self {
        Self {
            classifier: Arc::new(GsiClassifier),
            inclusion: Inclusion::default(),
            source: ImpactSource::default(),
            fraction: Arc::new(SignedShare),
        }
    }
}

impl ImpactAggregator {
    /// Aggregator with the GSI classifier, assimilated-only inclusion,
    /// field impact and signed shares.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the inclusion rule.
    #[must_use]
    pub fn with_inclusion(mut self, inclusion: Inclusion) -> Self {
        self.inclusion = inclusion;
        self
    }

    /// Set the per-record impact source.
    #[must_use]
    pub const fn with_source(mut self, source: ImpactSource) -> Self {
        self.source = source;
        self
    }

    /// Set the fraction policy.
    #[must_use]
    pub fn with_fraction_policy(mut self, policy: Arc<dyn FractionPolicy>) -> Self {
        self.fraction = policy;
        self
    }

    /// Aggregate any number of cycles into one summary.
    #[must_use]
    pub fn aggregate(&self, cycles: &[MergedCycle]) -> ImpactSummary {
        #[cfg(feature = "rayon")]
        let partial = cycles
            .par_iter()
            .map(|c| self.accumulate(c))
            .reduce(Partial::new, merge_partials);
        #[cfg(not(feature = "rayon"))]
        let partial = cycles
            .iter()
            .map(|c| self.accumulate(c))
            .fold(Partial::new(), merge_partials);

        let mut times: Vec<DateTime<Utc>> = cycles.iter().map(MergedCycle::cycle).collect();
        times.sort_unstable();
        times.dedup();
        self.finish(times, partial)
    }

    /// One summary per cycle, in input order.
    #[must_use]
    pub fn aggregate_per_cycle(&self, cycles: &[MergedCycle]) -> Vec<ImpactSummary> {
        cycles
            .iter()
            .map(|c| self.finish(vec![c.cycle()], self.accumulate(c)))
            .collect()
    }

    fn accumulate(&self, cycle: &MergedCycle) -> Partial {
        let mut partial = Partial::new();
        for block in cycle.blocks() {
            if block.is_empty() {
                partial.entry(ImpactKey::from(block.key())).or_default();
                continue;
            }
            let mut by_channel: BTreeMap<Option<i32>, KeyAccumulator> = BTreeMap::new();
            for record in block.records() {
                let acc = by_channel.entry(record.record().flag(Field::Channel)).or_default();
                self.accumulate_record(acc, record);
            }
            for (channel, acc) in by_channel {
                let key = ImpactKey {
                    block: block.key().clone(),
                    channel,
                };
                partial.entry(key).or_default().merge(&acc);
            }
        }
        debug!(cycle = %cycle.cycle(), keys = partial.len(), "cycle accumulated");
        partial
    }

    fn accumulate_record(&self, acc: &mut KeyAccumulator, record: &MergedRecord) {
        let class = self.classifier.classify(record);
        acc.counts.record(class);
        if !class.is_some_and(|c| self.inclusion.includes(c)) {
            return;
        }
        acc.included += 1;
        if self.source.wants_field() {
            if let Some(v) = record.impact().filter(|v| v.is_finite()) {
                acc.field.add(v);
                acc.field_records += 1;
            }
        }
        if self.source.wants_innovation() {
            if let Some(v) = innovation_impact(record).filter(|v| v.is_finite()) {
                acc.innovation.add(v);
                acc.innovation_records += 1;
            }
        }
        if let Some(v) = record.dfs().filter(|v| v.is_finite()) {
            acc.dfs.add(v);
            acc.dfs_records += 1;
        }
        if let Some(v) = record.omf() {
            acc.omf.add(v);
            acc.omf_records += 1;
        }
        if let Some(v) = record.oma() {
            acc.oma.add(v);
            acc.oma_records += 1;
        }
    }

    fn finish(&self, cycles: Vec<DateTime<Utc>>, partial: Partial) -> ImpactSummary {
        let sources: Vec<ImpactSource> = partial
            .values()
            .map(|acc| self.source.resolve(acc.field_records))
            .collect();
        let totals: Vec<KeyTotals> = partial
            .values()
            .zip(&sources)
            .map(|(acc, &source)| KeyTotals {
                total_impact: acc.impact(source).0.value(),
                dfs: (acc.dfs_records > 0).then(|| acc.dfs.value()),
            })
            .collect();
        let fractions = self.fraction.fractions(&totals);

        let mut total_impact = CompensatedSum::new();
        let mut total_dfs = CompensatedSum::new();
        let mut any_dfs = false;
        let keys = partial
            .into_iter()
            .zip(sources)
            .zip(totals.iter().zip(fractions))
            .map(|(((key, acc), source), (t, f))| {
                let impact_records = acc.impact(source).1;
                total_impact.add(t.total_impact);
                if let Some(d) = t.dfs {
                    total_dfs.add(d);
                    any_dfs = true;
                }
                KeyImpact {
                    key,
                    counts: acc.counts,
                    included: acc.included,
                    total_impact: t.total_impact,
                    impact_records,
                    excluded_impact: acc.included - impact_records,
                    impact_source: source,
                    dfs: t.dfs,
                    excluded_dfs: acc.included - acc.dfs_records,
                    fractional_impact: f.impact,
                    fractional_background_impact: f.background,
                    sum_omf: acc.omf.value(),
                    sum_oma: acc.oma.value(),
                    mean_omf: mean(&acc.omf, acc.omf_records),
                    mean_oma: mean(&acc.oma, acc.oma_records),
                }
            })
            .collect();

        ImpactSummary {
            cycles,
            policy: self.fraction.name().to_string(),
            keys,
            total_impact: total_impact.value(),
            total_dfs: any_dfs.then(|| total_dfs.value()),
        }
    }
}
