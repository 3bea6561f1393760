//! Arrow export of observation blocks

use super::ObservationBlock;
use crate::schema::FieldKind;
use crate::Result;
use arrow::array::{Array, Float64Array, Int32Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field as ArrowField, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Accumulates nullable columns for a `RecordBatch`.
#[derive(Default)]
pub(crate) struct ColumnSet {
    fields: Vec<ArrowField>,
    columns: Vec<Arc<dyn Array>>,
}

impl ColumnSet {
    pub(crate) fn utf8(&mut self, name: &str, values: Vec<Option<String>>) {
        self.fields.push(ArrowField::new(name, DataType::Utf8, true));
        self.columns.push(Arc::new(StringArray::from(values)));
    }

    pub(crate) fn float(&mut self, name: &str, values: Vec<Option<f64>>) {
        self.fields.push(ArrowField::new(name, DataType::Float64, true));
        self.columns.push(Arc::new(Float64Array::from(values)));
    }

    pub(crate) fn int(&mut self, name: &str, values: Vec<Option<i32>>) {
        self.fields.push(ArrowField::new(name, DataType::Int32, true));
        self.columns.push(Arc::new(Int32Array::from(values)));
    }

    pub(crate) fn count(&mut self, name: &str, values: Vec<u64>) {
        self.fields.push(ArrowField::new(name, DataType::UInt64, false));
        self.columns.push(Arc::new(UInt64Array::from(values)));
    }

    pub(crate) fn finish(self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(self.fields));
        Ok(RecordBatch::try_new(schema, self.columns)?)
    }
}

impl ObservationBlock {
    /// Export the block as an Arrow `RecordBatch`.
    ///
    /// One column per field the block's layout carries in the file: integer
    /// codes as `Int32`, everything else as `Float64`. Missing readings are
    /// nulls. Conventional blocks lead with a `station` column.
    ///
    /// # Errors
    ///
    /// Returns an error if Arrow rejects the assembled columns.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut set = ColumnSet::default();
        if self.records().iter().any(|r| r.station().is_some()) {
            set.utf8(
                "station",
                self.records().iter().map(|r| r.station().map(String::from)).collect(),
            );
        }
        let layout = self.layout();
        for (i, spec) in layout.specs().iter().enumerate() {
            if !layout.is_present_at(i) {
                continue;
            }
            match spec.kind {
                FieldKind::Integer => set.int(
                    spec.field.name(),
                    self.records().iter().map(|r| r.flag(spec.field)).collect(),
                ),
                FieldKind::Real => set.float(spec.field.name(), self.values(spec.field)),
            }
        }
        set.finish()
    }
}
