//! Observation records and blocks

use crate::schema::{Field, Layout, Reading, Sentinel};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Instrument/platform type code of a block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    /// Conventional observation type (kx)
    Kx(i32),
    /// Radiance platform (`dplat`, e.g. `n19`)
    Platform(String),
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kx(kx) => write!(f, "{kx}"),
            Self::Platform(p) => f.write_str(p),
        }
    }
}

impl From<i32> for TypeCode {
    fn from(kx: i32) -> Self {
        Self::Kx(kx)
    }
}

impl From<&str> for TypeCode {
    fn from(platform: &str) -> Self {
        Self::Platform(platform.to_string())
    }
}

/// (variable, type code) key of a block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    /// Variable token (`t`, `uv`) or radiance obstype (`amsua`)
    pub variable: String,
    /// Type code
    pub type_code: TypeCode,
}

impl BlockKey {
    /// Create a key
    #[must_use]
    pub fn new(variable: impl Into<String>, type_code: impl Into<TypeCode>) -> Self {
        Self {
            variable: variable.into(),
            type_code: type_code.into(),
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.variable, self.type_code)
    }
}

/// One decoded observation (radiance: one location and one channel).
///
/// Readings are aligned with the record's [`Layout`]; fields whose column is
/// not in the file are `Missing(Absent)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    station: Option<String>,
    layout: Arc<Layout>,
    readings: Box<[Reading]>,
}

impl ObservationRecord {
    /// Assemble a record from readings in layout order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the reading count differs from the
    /// layout's field count.
    pub fn new(layout: Arc<Layout>, station: Option<String>, readings: Vec<Reading>) -> Result<Self> {
        if readings.len() != layout.specs().len() {
            return Err(Error::InvalidInput(format!(
                "record has {} readings, layout has {} fields",
                readings.len(),
                layout.specs().len()
            )));
        }
        Ok(Self {
            station,
            layout,
            readings: readings.into_boxed_slice(),
        })
    }

    /// Start a record where every field is missing.
    #[must_use]
    pub fn builder(layout: Arc<Layout>) -> ObservationRecordBuilder {
        ObservationRecordBuilder::new(layout)
    }

    /// Station identifier (conventional data only).
    #[must_use]
    pub fn station(&self) -> Option<&str> {
        self.station.as_deref()
    }

    /// Layout the readings follow
    #[must_use]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Readings in layout order
    #[must_use]
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Reading of a field; `None` if the layout does not carry it.
    #[must_use]
    pub fn reading(&self, field: Field) -> Option<Reading> {
        self.layout.position(field).map(|i| self.readings[i])
    }

    /// Numeric value of a field; `None` when missing or not carried.
    #[must_use]
    pub fn value(&self, field: Field) -> Option<f64> {
        self.reading(field).and_then(Reading::value)
    }

    /// Integer flag value (rounded).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn flag(&self, field: Field) -> Option<i32> {
        self.value(field).map(|v| v.round() as i32)
    }

    /// Final inverse observation error, from the field or from the error.
    #[must_use]
    pub fn inverse_error(&self) -> Option<f64> {
        self.value(Field::InverseError)
            .or_else(|| self.value(Field::ObsError).filter(|e| *e > 0.0).map(f64::recip))
    }

    /// Final observation error, from the field or from the inverse error.
    #[must_use]
    pub fn observation_error(&self) -> Option<f64> {
        self.value(Field::ObsError)
            .or_else(|| self.value(Field::InverseError).filter(|e| *e > 0.0).map(f64::recip))
    }
}

/// Builder for `ObservationRecord`.
#[derive(Debug)]
pub struct ObservationRecordBuilder {
    station: Option<String>,
    layout: Arc<Layout>,
    readings: Vec<Reading>,
}

impl ObservationRecordBuilder {
    /// Create a new builder; present fields start at their sentinel.
    #[must_use]
    pub fn new(layout: Arc<Layout>) -> Self {
        let readings = layout
            .specs()
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                if layout.is_present_at(i) {
                    Reading::Missing(spec.sentinel)
                } else {
                    Reading::Missing(Sentinel::Absent)
                }
            })
            .collect();
        Self {
            station: None,
            layout,
            readings,
        }
    }

    /// Set the station identifier.
    #[must_use]
    pub fn station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }

    /// Set a field. Values are stored at file precision (f32); fields whose
    /// column is absent from the layout stay absent.
    #[must_use]
    pub fn set(mut self, field: Field, value: f64) -> Self {
        if let Some(i) = self.layout.position(field) {
            if self.layout.is_present_at(i) {
                self.readings[i] = Reading::from(value);
            }
        }
        self
    }

    /// Mark a field missing with a specific sentinel.
    #[must_use]
    pub fn missing(mut self, field: Field, sentinel: Sentinel) -> Self {
        if let Some(i) = self.layout.position(field) {
            if self.layout.is_present_at(i) {
                self.readings[i] = Reading::Missing(sentinel);
            }
        }
        self
    }

    /// Build the `ObservationRecord`.
    #[must_use]
    pub fn build(self) -> ObservationRecord {
        ObservationRecord {
            station: self.station,
            layout: self.layout,
            readings: self.readings.into_boxed_slice(),
        }
    }
}

/// All records of one (variable, type code) pair, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBlock {
    key: BlockKey,
    layout: Arc<Layout>,
    records: Vec<ObservationRecord>,
}

impl ObservationBlock {
    /// Create a block from records in file order.
    #[must_use]
    pub fn new(key: BlockKey, layout: Arc<Layout>, records: Vec<ObservationRecord>) -> Self {
        Self { key, layout, records }
    }

    pub(crate) fn push(&mut self, record: ObservationRecord) {
        self.records.push(record);
    }

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

    /// Layout of the block's first decoded data record
    #[must_use]
    pub const fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Records in file order
    #[must_use]
    pub fn records(&self) -> &[ObservationRecord] {
        &self.records
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the block has no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One field across all records, `None` where missing.
    #[must_use]
    pub fn values(&self, field: Field) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.value(field)).collect()
    }

    /// Distinct channel numbers in first-seen order (radiance).
    #[must_use]
    pub fn channels(&self) -> Vec<i32> {
        let mut seen = Vec::new();
        for ch in self.records.iter().filter_map(|r| r.flag(Field::Channel)) {
            if !seen.contains(&ch) {
                seen.push(ch);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn t_layout() -> Arc<Layout> {
        SchemaRegistry::default()
            .schema("conv")
            .unwrap()
            .shared_layout("t", 20, 0)
    }

    #[test]
    fn test_builder_defaults_to_sentinels() {
        let record = ObservationRecord::builder(t_layout()).build();
        assert_eq!(record.reading(Field::Omf), Some(Reading::Missing(Sentinel::E11)));
        assert_eq!(record.reading(Field::Wvv), Some(Reading::Missing(Sentinel::Absent)));
        assert_eq!(record.reading(Field::Impact), None);
    }

    #[test]
    fn test_builder_ignores_absent_columns() {
        let record = ObservationRecord::builder(t_layout())
            .set(Field::Wvv, 1.0)
            .set(Field::Impact, 1.0)
            .build();
        assert_eq!(record.value(Field::Wvv), None);
        assert_eq!(record.value(Field::Impact), None);
    }

    #[test]
    fn test_error_derivations() {
        let record = ObservationRecord::builder(t_layout())
            .set(Field::InverseError, 0.5)
            .build();
        assert_eq!(record.inverse_error(), Some(0.5));
        assert_eq!(record.observation_error(), Some(2.0));
    }

    #[test]
    fn test_new_rejects_wrong_width() {
        let err = ObservationRecord::new(t_layout(), None, vec![Reading::Value(1.0)]).unwrap_err();
        assert!(err.to_string().contains("layout has"));
    }

    #[test]
    fn test_type_code_display() {
        assert_eq!(BlockKey::new("uv", 220).to_string(), "uv/220");
        assert_eq!(BlockKey::new("amsua", "n19").to_string(), "amsua/n19");
    }
}
