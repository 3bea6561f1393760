//! Decoded diagnostic files
//!
//! An [`ObservationTable`] is the read-only result of decoding one file: a
//! family tag, the cycle time, sensor metadata for radiance files, and the
//! observation blocks in first-seen order.

mod columnar;
mod record;

pub(crate) use columnar::ColumnSet;
pub use record::{BlockKey, ObservationBlock, ObservationRecord, ObservationRecordBuilder, TypeCode};

use crate::schema::{Field, Layout};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// One entry of the radiance channel table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Frequency (GHz)
    pub freq: f32,
    /// Polarization
    pub pol: f32,
    /// Wavelength
    pub wave: f32,
    /// Channel error variance
    pub varch: f32,
    /// Temperature lapse rate
    pub tlap: f32,
    /// Analysis usage flag
    pub iuse: i32,
    /// Sensor channel number
    pub nuchan: i32,
    /// Index into the satinfo table
    pub ich: i32,
}

/// Radiance file header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    /// Sensor/instrument/satellite id (`amsua_n19`)
    pub isis: String,
    /// Platform (`n19`)
    pub platform: String,
    /// Observation type (`amsua`)
    pub obstype: String,
    /// Outer-loop counter
    pub jiter: i32,
    /// Bias predictors per channel
    pub npred: usize,
    /// Location reals per record
    pub ireal: usize,
    /// Reals per channel
    pub ipchan: usize,
    /// Extra-record flag
    pub iextra: i32,
    /// Trailing extra reals per record
    pub jextra: usize,
    /// Channel table, in file order
    pub channels: Vec<ChannelInfo>,
}

impl SensorInfo {
    /// Reals per channel in an observation record (channel data, predictors, two extra).
    #[must_use]
    pub const fn channel_stride(&self) -> usize {
        self.ipchan.saturating_add(self.npred).saturating_add(2)
    }

    /// Trailing extra reals per observation record: `jextra` when the
    /// extra flag is set, none otherwise.
    #[must_use]
    pub const fn extra_width(&self) -> usize {
        if self.iextra > 0 {
            self.jextra
        } else {
            0
        }
    }

    /// Total reals in one observation record, `None` if the header counts
    /// overflow.
    #[must_use]
    pub fn record_width(&self) -> Option<usize> {
        let stride = self.ipchan.checked_add(self.npred)?.checked_add(2)?;
        stride
            .checked_mul(self.channels.len())?
            .checked_add(self.ireal)?
            .checked_add(self.extra_width())
    }

    /// Channel numbers in table order.
    #[must_use]
    pub fn channel_numbers(&self) -> Vec<i32> {
        self.channels.iter().map(|c| c.nuchan).collect()
    }
}

/// A recoverable decode event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeWarning {
    /// Byte offset of the block header
    pub offset: u64,
    /// Unrecognised variable token
    pub token: String,
    /// Records skipped with the block
    pub records: usize,
}

impl DecodeWarning {
    /// The equivalent recoverable error.
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::UnknownVariableToken {
            token: self.token.clone(),
            offset: self.offset,
            records: self.records,
        }
    }
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

/// Parse a GSI `YYYYMMDDHH` date.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn parse_idate(idate: i32) -> Option<DateTime<Utc>> {
    if idate <= 0 {
        return None;
    }
    let year = idate / 1_000_000;
    let month = (idate / 10_000 % 100) as u32;
    let day = (idate / 100 % 100) as u32;
    let hour = (idate % 100) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Format a cycle time back to `YYYYMMDDHH`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn format_idate(cycle: DateTime<Utc>) -> i32 {
    use chrono::{Datelike, Timelike};
    cycle.year() * 1_000_000
        + cycle.month() as i32 * 10_000
        + cycle.day() as i32 * 100
        + cycle.hour() as i32
}

/// Decoded contents of one diagnostic file.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    family: String,
    idate: i32,
    cycle: DateTime<Utc>,
    sensor: Option<SensorInfo>,
    blocks: Vec<ObservationBlock>,
    index: BTreeMap<BlockKey, usize>,
    warnings: Vec<DecodeWarning>,
}

impl ObservationTable {
    pub(crate) fn new(family: impl Into<String>, idate: i32) -> Result<Self> {
        let cycle = parse_idate(idate).ok_or_else(|| Error::InvalidHeader {
            offset: 0,
            reason: format!("invalid cycle date {idate}"),
        })?;
        Ok(Self {
            family: family.into(),
            idate,
            cycle,
            sensor: None,
            blocks: Vec::new(),
            index: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }

    /// Start a table for a cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if `idate` is not a valid `YYYYMMDDHH`.
    pub fn builder(family: impl Into<String>, idate: i32) -> Result<ObservationTableBuilder> {
        Ok(ObservationTableBuilder {
            table: Self::new(family, idate)?,
        })
    }

    pub(crate) fn with_sensor(mut self, sensor: SensorInfo) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Append a record to the block for `key`, creating the block on first use.
    pub(crate) fn push(&mut self, key: BlockKey, layout: &Arc<Layout>, record: ObservationRecord) {
        let next = self.blocks.len();
        let slot = *self.index.entry(key.clone()).or_insert(next);
        if slot == next {
            self.blocks
                .push(ObservationBlock::new(key, Arc::clone(layout), Vec::new()));
        }
        self.blocks[slot].push(record);
    }

    /// Append a whole block, concatenating with an existing block of the same key.
    pub(crate) fn push_block(&mut self, block: ObservationBlock) {
        if let Some(&slot) = self.index.get(block.key()) {
            for record in block.records() {
                self.blocks[slot].push(record.clone());
            }
        } else {
            self.index.insert(block.key().clone(), self.blocks.len());
            self.blocks.push(block);
        }
    }

    pub(crate) fn warn(&mut self, warning: DecodeWarning) {
        self.warnings.push(warning);
    }

    /// Family tag
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Cycle date as written in the file (`YYYYMMDDHH`)
    #[must_use]
    pub const fn idate(&self) -> i32 {
        self.idate
    }

    /// Cycle time
    #[must_use]
    pub const fn cycle(&self) -> DateTime<Utc> {
        self.cycle
    }

    /// Radiance sensor metadata
    #[must_use]
    pub const fn sensor(&self) -> Option<&SensorInfo> {
        self.sensor.as_ref()
    }

    /// Recoverable events seen while decoding
    #[must_use]
    pub fn warnings(&self) -> &[DecodeWarning] {
        &self.warnings
    }

    /// Blocks in first-seen order
    #[must_use]
    pub fn blocks(&self) -> &[ObservationBlock] {
        &self.blocks
    }

    /// Block for one (variable, type code) pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingBlock`] if the table has no such block.
    pub fn block(&self, variable: &str, type_code: &TypeCode) -> Result<&ObservationBlock> {
        self.get(&BlockKey::new(variable, type_code.clone()))
            .ok_or_else(|| Error::MissingBlock {
                variable: variable.to_string(),
                type_code: type_code.to_string(),
            })
    }

    /// Block by key, if present.
    #[must_use]
    pub fn get(&self, key: &BlockKey) -> Option<&ObservationBlock> {
        self.index.get(key).map(|&i| &self.blocks[i])
    }

    /// Blocks of one variable, optionally restricted to a set of type codes.
    #[must_use]
    pub fn blocks_for(&self, variable: &str, type_codes: Option<&[TypeCode]>) -> Vec<&ObservationBlock> {
        self.blocks
            .iter()
            .filter(|b| b.variable() == variable)
            .filter(|b| type_codes.map_or(true, |codes| codes.contains(b.type_code())))
            .collect()
    }

    /// Distinct variable tokens in first-seen order.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for b in &self.blocks {
            if !seen.contains(&b.variable()) {
                seen.push(b.variable());
            }
        }
        seen
    }

    /// Conventional type codes of one variable, sorted.
    #[must_use]
    pub fn kx_list(&self, variable: &str) -> Vec<i32> {
        self.kx_counts(variable).into_keys().collect()
    }

    /// Record counts per conventional type code of one variable.
    #[must_use]
    pub fn kx_counts(&self, variable: &str) -> BTreeMap<i32, usize> {
        self.blocks_for(variable, None)
            .into_iter()
            .filter_map(|b| match b.type_code() {
                TypeCode::Kx(kx) => Some((*kx, b.len())),
                TypeCode::Platform(_) => None,
            })
            .collect()
    }

    /// Channel numbers of a radiance file, in table order.
    #[must_use]
    pub fn channels(&self) -> Vec<i32> {
        self.sensor.as_ref().map(SensorInfo::channel_numbers).unwrap_or_default()
    }

    /// Total records over all blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.iter().map(ObservationBlock::len).sum()
    }

    /// Whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of records carrying a value for `field`.
    #[must_use]
    pub fn count_present(&self, field: Field) -> usize {
        self.blocks
            .iter()
            .flat_map(ObservationBlock::records)
            .filter(|r| r.value(field).is_some())
            .count()
    }

    /// Human-readable summary of the table contents.
    #[must_use]
    pub fn overview(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "family: {}  cycle: {}", self.family, self.idate);
        if let Some(sensor) = &self.sensor {
            let _ = writeln!(
                out,
                "sensor: {} ({} on {}), {} channels",
                sensor.isis,
                sensor.obstype,
                sensor.platform,
                sensor.channels.len()
            );
        }
        for variable in self.variables() {
            let blocks = self.blocks_for(variable, None);
            let total: usize = blocks.iter().map(|b| b.len()).sum();
            let codes: Vec<String> = blocks.iter().map(|b| b.type_code().to_string()).collect();
            let _ = writeln!(out, "{variable}: {total} records, types [{}]", codes.join(", "));
        }
        for w in &self.warnings {
            let _ = writeln!(out, "warning: {w}");
        }
        out
    }
}

/// Builder for `ObservationTable`.
///
/// Tables are immutable once built; the decoder and test fixtures assemble
/// them through this builder.
///
/// ```rust
/// use diag_impact::schema::{Field, SchemaRegistry};
/// use diag_impact::table::{BlockKey, ObservationRecord, ObservationTable};
///
/// let layout = SchemaRegistry::default().schema("conv")?.shared_layout("t", 20, 0);
/// let mut builder = ObservationTable::builder("conventional", 2_024_010_100)?;
/// builder.push(BlockKey::new("t", 120), &layout, ObservationRecord::builder(layout.clone()).build());
/// let table = builder.build();
/// assert_eq!(table.len(), 1);
/// # Ok::<(), diag_impact::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ObservationTableBuilder {
    table: ObservationTable,
}

impl ObservationTableBuilder {
    /// Attach radiance sensor metadata.
    #[must_use]
    pub fn sensor(mut self, sensor: SensorInfo) -> Self {
        self.table.sensor = Some(sensor);
        self
    }

    /// Append a record to the block for `key`, creating the block on first use.
    pub fn push(&mut self, key: BlockKey, layout: &Arc<Layout>, record: ObservationRecord) -> &mut Self {
        self.table.push(key, layout, record);
        self
    }

    /// Append a whole block, concatenating with an existing block of the same key.
    pub fn push_block(&mut self, block: ObservationBlock) -> &mut Self {
        self.table.push_block(block);
        self
    }

    /// Build the `ObservationTable`.
    #[must_use]
    pub fn build(self) -> ObservationTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn layout(variable: &str) -> Arc<Layout> {
        SchemaRegistry::default()
            .schema("conv")
            .unwrap()
            .shared_layout(variable, 20, 0)
    }

    fn record(layout: &Arc<Layout>, omf: f64) -> ObservationRecord {
        ObservationRecord::builder(Arc::clone(layout)).set(Field::Omf, omf).build()
    }

    fn sample() -> ObservationTable {
        let t = layout("t");
        let q = layout("q");
        let mut builder = ObservationTable::builder("conventional", 2_024_010_100).unwrap();
        builder
            .push(BlockKey::new("t", 120), &t, record(&t, 1.0))
            .push(BlockKey::new("q", 120), &q, record(&q, 0.1))
            .push(BlockKey::new("t", 180), &t, record(&t, 2.0))
            .push(BlockKey::new("t", 120), &t, record(&t, 3.0));
        builder.build()
    }

    #[test]
    fn test_same_key_blocks_concatenate() {
        let table = sample();
        let block = table.block("t", &TypeCode::Kx(120)).unwrap();
        assert_eq!(block.values(Field::Omf), vec![Some(1.0), Some(3.0)]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_block_order_is_first_seen() {
        let table = sample();
        let keys: Vec<String> = table.blocks().iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys, vec!["t/120", "q/120", "t/180"]);
        assert_eq!(table.variables(), vec!["t", "q"]);
    }

    #[test]
    fn test_missing_block() {
        let table = sample();
        let err = table.block("uv", &TypeCode::Kx(220)).unwrap_err();
        assert!(matches!(err, Error::MissingBlock { .. }));
    }

    #[test]
    fn test_kx_helpers() {
        let table = sample();
        assert_eq!(table.kx_list("t"), vec![120, 180]);
        assert_eq!(table.kx_counts("t").get(&120), Some(&2));
        assert_eq!(table.blocks_for("t", Some(&[TypeCode::Kx(180)])).len(), 1);
    }

    #[test]
    fn test_idate_parsing() {
        let cycle = parse_idate(2_024_013_118).unwrap();
        assert_eq!(cycle.to_rfc3339(), "2024-01-31T18:00:00+00:00");
        assert_eq!(format_idate(cycle), 2_024_013_118);
        assert!(parse_idate(2_024_023_000).is_none());
        assert!(ObservationTable::builder("conventional", 12).is_err());
    }

    fn sensor(iextra: i32, jextra: usize) -> SensorInfo {
        SensorInfo {
            isis: "amsua_n19".to_string(),
            platform: "n19".to_string(),
            obstype: "amsua".to_string(),
            jiter: 1,
            npred: 5,
            ireal: 26,
            ipchan: 8,
            iextra,
            jextra,
            channels: vec![
                ChannelInfo {
                    freq: 23.8,
                    pol: 1.0,
                    wave: 0.0,
                    varch: 2.5,
                    tlap: 0.0,
                    iuse: 1,
                    nuchan: 1,
                    ich: 1,
                };
                2
            ],
        }
    }

    #[test]
    fn test_extra_width_is_jextra_when_flagged() {
        assert_eq!(sensor(2, 3).extra_width(), 3);
        assert_eq!(sensor(0, 3).extra_width(), 0);
        assert_eq!(sensor(2, 3).record_width(), Some(26 + 15 * 2 + 3));
    }

    #[test]
    fn test_record_width_overflow() {
        let mut info = sensor(1, usize::MAX);
        assert_eq!(info.record_width(), None);
        info.iextra = 0;
        info.ipchan = usize::MAX;
        assert_eq!(info.record_width(), None);
    }

    #[test]
    fn test_overview_mentions_blocks() {
        let text = sample().overview();
        assert!(text.contains("t: 3 records, types [120, 180]"));
    }
}
