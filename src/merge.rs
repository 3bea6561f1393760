//! OmF/OmA cycle merge
//!
//! A cycle is diagnosed twice: once against the background (first outer
//! loop) and once against the analysis (last outer loop). [`CycleMerger`]
//! pairs the two tables block by block so every record carries both
//! innovations.
//!
//! ```rust
//! use diag_impact::merge::{Alignment, CycleMerger};
//!
//! let merger = CycleMerger::new().with_alignment(Alignment::Identity);
//! assert_eq!(merger.alignment(), Alignment::Identity);
//! ```

use crate::schema::{Field, Layout};
use crate::table::{BlockKey, ColumnSet, ObservationBlock, ObservationRecord, ObservationTable, TypeCode};
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How background and analysis records are paired within a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Zip by position; requires equal record counts
    #[default]
    Positional,
    /// Pair by observation identity (station, channel, location, time)
    Identity,
}

/// Which inputs contributed a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Present in both tables
    Both,
    /// Background table only; analysis innovations are missing
    BackgroundOnly,
    /// Analysis table only; background innovations are missing
    AnalysisOnly,
}

/// A block whose record counts differ between the two outer loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMismatch {
    /// Block key
    pub key: BlockKey,
    /// Background record count
    pub background: usize,
    /// Analysis record count
    pub analysis: usize,
}

impl BlockMismatch {
    /// The equivalent error value.
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::OuterLoopMismatch {
            variable: self.key.variable.clone(),
            type_code: self.key.type_code.to_string(),
            background: self.background,
            analysis: self.analysis,
        }
    }
}

/// One observation with both innovations.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    record: ObservationRecord,
    omf: Option<f64>,
    oma: Option<f64>,
    omf_v: Option<f64>,
    oma_v: Option<f64>,
    impact: Option<f64>,
    dfs: Option<f64>,
}

impl MergedRecord {
    fn pair(background: &ObservationRecord, analysis: Option<&ObservationRecord>) -> Self {
        Self {
            record: background.clone(),
            omf: background.value(Field::Omf),
            oma: analysis.and_then(|a| a.value(Field::Omf)),
            omf_v: background.value(Field::OmfV),
            oma_v: analysis.and_then(|a| a.value(Field::OmfV)),
            impact: background
                .value(Field::Impact)
                .or_else(|| analysis.and_then(|a| a.value(Field::Impact))),
            dfs: background
                .value(Field::Dfs)
                .or_else(|| analysis.and_then(|a| a.value(Field::Dfs))),
        }
    }

    fn analysis_only(analysis: &ObservationRecord) -> Self {
        Self {
            record: analysis.clone(),
            omf: None,
            oma: analysis.value(Field::Omf),
            omf_v: None,
            oma_v: analysis.value(Field::OmfV),
            impact: analysis.value(Field::Impact),
            dfs: analysis.value(Field::Dfs),
        }
    }

    /// Descriptive record (background side when available).
    #[must_use]
    pub const fn record(&self) -> &ObservationRecord {
        &self.record
    }

    /// Descriptive field value from the background record.
    #[must_use]
    pub fn value(&self, field: Field) -> Option<f64> {
        self.record.value(field)
    }

    /// Observation minus background
    #[must_use]
    pub const fn omf(&self) -> Option<f64> {
        self.omf
    }

    /// Observation minus analysis
    #[must_use]
    pub const fn oma(&self) -> Option<f64> {
        self.oma
    }

    /// Meridional wind observation minus background (`uv` only)
    #[must_use]
    pub const fn omf_v(&self) -> Option<f64> {
        self.omf_v
    }

    /// Meridional wind observation minus analysis (`uv` only)
    #[must_use]
    pub const fn oma_v(&self) -> Option<f64> {
        self.oma_v
    }

    /// Per-observation impact field
    #[must_use]
    pub const fn impact(&self) -> Option<f64> {
        self.impact
    }

    /// Per-observation degrees of freedom for signal
    #[must_use]
    pub const fn dfs(&self) -> Option<f64> {
        self.dfs
    }

    /// Final inverse observation error
    #[must_use]
    pub fn inverse_error(&self) -> Option<f64> {
        self.record.inverse_error()
    }
}

/// Merged records of one (variable, type code) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedBlock {
    key: BlockKey,
    layout: Arc<Layout>,
    side: Side,
    records: Vec<MergedRecord>,
}

impl MergedBlock {
    /// Block key
    #[must_use]
    pub const fn key(&self) -> &BlockKey {
        &self.key
    }

    /// Variable token
    #[must_use]
    pub fn variable(&self) -> &str {
        &self.key.variable
    }

    /// Type code
    #[must_use]
    pub const fn type_code(&self) -> &TypeCode {
        &self.key.type_code
    }

    /// Layout of the descriptive records
    #[must_use]
    pub const fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Which inputs contributed the block
    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    /// Merged records
    #[must_use]
    pub fn records(&self) -> &[MergedRecord] {
        &self.records
    }

    /// Record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the block is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Export as an Arrow `RecordBatch`: location columns, QC flags, the
    /// inverse error and both innovations. Missing values are nulls.
    ///
    /// # Errors
    ///
    /// Returns an error if Arrow rejects the assembled columns.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut set = ColumnSet::default();
        if self.records.iter().any(|r| r.record().station().is_some()) {
            set.utf8(
                "station",
                self.records.iter().map(|r| r.record().station().map(String::from)).collect(),
            );
        }
        for field in [Field::Latitude, Field::Longitude, Field::Pressure, Field::TimeOffset] {
            if self.layout.is_present(field) {
                set.float(field.name(), self.collect(|r| r.value(field)));
            }
        }
        for field in [Field::Channel, Field::Idqc, Field::Iuse] {
            if self.layout.is_present(field) {
                set.int(field.name(), self.records.iter().map(|r| r.record().flag(field)).collect());
            }
        }
        set.float("errinv", self.collect(MergedRecord::inverse_error));
        set.float("omf", self.collect(MergedRecord::omf));
        set.float("oma", self.collect(MergedRecord::oma));
        if self.layout.is_present(Field::OmfV) {
            set.float("omf_v", self.collect(MergedRecord::omf_v));
            set.float("oma_v", self.collect(MergedRecord::oma_v));
        }
        set.float("imp", self.collect(MergedRecord::impact));
        set.float("dfs", self.collect(MergedRecord::dfs));
        set.finish()
    }

    fn collect(&self, f: impl Fn(&MergedRecord) -> Option<f64>) -> Vec<Option<f64>> {
        self.records.iter().map(f).collect()
    }
}

/// Result of merging one cycle's background and analysis tables.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCycle {
    family: String,
    cycle: DateTime<Utc>,
    blocks: Vec<MergedBlock>,
    index: BTreeMap<BlockKey, usize>,
    failures: Vec<BlockMismatch>,
    one_sided: Vec<(BlockKey, Side)>,
}

impl MergedCycle {
    /// Family tag
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Cycle time (from the background table)
    #[must_use]
    pub const fn cycle(&self) -> DateTime<Utc> {
        self.cycle
    }

    /// Merged blocks in background order, then analysis-only blocks
    #[must_use]
    pub fn blocks(&self) -> &[MergedBlock] {
        &self.blocks
    }

    /// Merged block for one key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingBlock`] if the block was not merged.
    pub fn block(&self, variable: &str, type_code: &TypeCode) -> Result<&MergedBlock> {
        let key = BlockKey::new(variable, type_code.clone());
        self.index
            .get(&key)
            .map(|&i| &self.blocks[i])
            .ok_or_else(|| Error::MissingBlock {
                variable: variable.to_string(),
                type_code: type_code.to_string(),
            })
    }

    /// Blocks that failed with an outer-loop count mismatch
    #[must_use]
    pub fn failures(&self) -> &[BlockMismatch] {
        &self.failures
    }

    /// Blocks present in only one input
    #[must_use]
    pub fn one_sided(&self) -> &[(BlockKey, Side)] {
        &self.one_sided
    }

    /// Total merged records
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.blocks.iter().map(MergedBlock::len).sum()
    }
}

/// Pairs background and analysis tables of one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleMerger {
    alignment: Alignment,
}

impl CycleMerger {
    /// Merger with positional alignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alignment policy.
    #[must_use]
    pub const fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Alignment policy in use
    #[must_use]
    pub const fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Merge a cycle's background and analysis tables.
    ///
    /// Count mismatches are recorded per block in
    /// [`MergedCycle::failures`]; the remaining blocks still merge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FamilyMismatch`] if the tables belong to different
    /// families.
    pub fn merge(&self, background: &ObservationTable, analysis: &ObservationTable) -> Result<MergedCycle> {
        if background.family() != analysis.family() {
            return Err(Error::FamilyMismatch {
                background: background.family().to_string(),
                analysis: analysis.family().to_string(),
            });
        }
        if background.cycle() != analysis.cycle() {
            warn!(
                background = %background.cycle(),
                analysis = %analysis.cycle(),
                "merging tables with different cycle times"
            );
        }

        let mut merged = MergedCycle {
            family: background.family().to_string(),
            cycle: background.cycle(),
            blocks: Vec::new(),
            index: BTreeMap::new(),
            failures: Vec::new(),
            one_sided: Vec::new(),
        };

        for bg in background.blocks() {
            let block = match analysis.get(bg.key()) {
                Some(an) => match self.pair_block(bg, an) {
                    Some(records) => MergedBlock {
                        key: bg.key().clone(),
                        layout: Arc::clone(bg.layout()),
                        side: Side::Both,
                        records,
                    },
                    None => {
                        let mismatch = BlockMismatch {
                            key: bg.key().clone(),
                            background: bg.len(),
                            analysis: an.len(),
                        };
                        warn!(block = %mismatch.key, background = bg.len(), analysis = an.len(), "outer-loop count mismatch");
                        merged.failures.push(mismatch);
                        continue;
                    }
                },
                None => {
                    merged.one_sided.push((bg.key().clone(), Side::BackgroundOnly));
                    MergedBlock {
                        key: bg.key().clone(),
                        layout: Arc::clone(bg.layout()),
                        side: Side::BackgroundOnly,
                        records: bg.records().iter().map(|r| MergedRecord::pair(r, None)).collect(),
                    }
                }
            };
            debug!(block = %block.key, records = block.len(), "block merged");
            merged.push(block);
        }

        for an in analysis.blocks() {
            if background.get(an.key()).is_none() {
                merged.one_sided.push((an.key().clone(), Side::AnalysisOnly));
                merged.push(MergedBlock {
                    key: an.key().clone(),
                    layout: Arc::clone(an.layout()),
                    side: Side::AnalysisOnly,
                    records: an.records().iter().map(MergedRecord::analysis_only).collect(),
                });
            }
        }
        Ok(merged)
    }

    fn pair_block(&self, bg: &ObservationBlock, an: &ObservationBlock) -> Option<Vec<MergedRecord>> {
        match self.alignment {
            Alignment::Positional => (bg.len() == an.len()).then(|| {
                bg.records()
                    .iter()
                    .zip(an.records())
                    .map(|(b, a)| MergedRecord::pair(b, Some(a)))
                    .collect()
            }),
            Alignment::Identity => Some(pair_by_identity(bg, an)),
        }
    }
}

impl MergedCycle {
    fn push(&mut self, block: MergedBlock) {
        self.index.insert(block.key.clone(), self.blocks.len());
        self.blocks.push(block);
    }
}

/// Identity of an observation: station, channel, rounded position and time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Identity {
    station: Option<String>,
    channel: Option<i32>,
    lat: i64,
    lon: i64,
    pressure: i64,
    time: i64,
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(value: Option<f64>, scale: f64) -> i64 {
    value.map_or(i64::MIN, |v| (v * scale).round() as i64)
}

impl Identity {
    fn of(record: &ObservationRecord) -> Self {
        Self {
            station: record.station().map(str::to_string),
            channel: record.flag(Field::Channel),
            lat: quantize(record.value(Field::Latitude), 1e3),
            lon: quantize(record.value(Field::Longitude), 1e3),
            pressure: quantize(record.value(Field::Pressure), 1e2),
            time: quantize(record.value(Field::TimeOffset), 1e4),
        }
    }
}

/// Identities with an occurrence index, so repeated observations pair in order.
fn keyed(records: &[ObservationRecord]) -> Vec<(Identity, usize)> {
    let mut seen: FxHashMap<Identity, usize> = FxHashMap::default();
    records
        .iter()
        .map(|r| {
            let id = Identity::of(r);
            let n = seen.entry(id.clone()).or_insert(0);
            let occurrence = *n;
            *n += 1;
            (id, occurrence)
        })
        .collect()
}

fn pair_by_identity(bg: &ObservationBlock, an: &ObservationBlock) -> Vec<MergedRecord> {
    let mut lookup: FxHashMap<(Identity, usize), usize> = keyed(an.records())
        .into_iter()
        .enumerate()
        .map(|(i, key)| (key, i))
        .collect();

    let mut records: Vec<MergedRecord> = keyed(bg.records())
        .into_iter()
        .zip(bg.records())
        .map(|(key, b)| {
            let partner = lookup.remove(&key).map(|i| &an.records()[i]);
            MergedRecord::pair(b, partner)
        })
        .collect();

    let mut leftovers: Vec<usize> = lookup.into_values().collect();
    leftovers.sort_unstable();
    if !leftovers.is_empty() {
        debug!(block = %bg.key(), unmatched = leftovers.len(), "analysis records without background partner");
    }
    records.extend(leftovers.into_iter().map(|i| MergedRecord::analysis_only(&an.records()[i])));
    records
}
