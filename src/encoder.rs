//! Native-format writer
//!
//! Writes an [`ObservationTable`] back as a big-endian Fortran sequential
//! file. Missing readings are written with the sentinel they were read
//! with, so decoding the output reproduces the table.

use crate::decoder::{write_record, PayloadWriter, STATION_ID_LEN};
use crate::schema::{Field, Layout, Reading, Sentinel, Source};
use crate::table::{ObservationBlock, ObservationRecord, ObservationTable, SensorInfo, TypeCode};
use crate::{Error, Result};
use std::io::Write;

/// Writer for diagnostic files.
#[derive(Debug)]
pub struct DiagnosticWriter<W: Write> {
    inner: W,
}

impl<W: Write> DiagnosticWriter<W> {
    /// Wrap a byte sink.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a whole table. Radiance tables (with sensor metadata) use the
    /// sensor framing, all others the blocked framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a radiance block does not hold a
    /// whole number of locations, or an I/O error from the sink.
    pub fn write_table(&mut self, table: &ObservationTable) -> Result<()> {
        match table.sensor() {
            Some(sensor) => self.write_sensor(table, sensor),
            None => self.write_blocked(table),
        }
    }

    /// Write the explicit end marker (a zero-length record).
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the sink.
    pub fn end_marker(&mut self) -> Result<()> {
        write_record(&mut self.inner, &[])
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn write_blocked(&mut self, table: &ObservationTable) -> Result<()> {
        let mut date = PayloadWriter::default();
        date.i32(table.idate());
        write_record(&mut self.inner, &date.into_bytes())?;
        for block in table.blocks() {
            let ninfo = block.layout().location_width();
            let mut header = PayloadWriter::default();
            header
                .text(block.variable(), 3)
                .i32(1)
                .count(ninfo)?
                .count(block.len())?
                .i32(0);
            write_record(&mut self.inner, &header.into_bytes())?;

            let mut data = PayloadWriter::default();
            for record in block.records() {
                data.text(record.station().unwrap_or(""), STATION_ID_LEN);
            }
            for record in block.records() {
                let mut row = vec![0.0_f32; ninfo];
                fill(&mut row, record, |s| match s {
                    Source::Column(c) => Some(c),
                    _ => None,
                });
                if let (Some(Reading::Missing(_)), TypeCode::Kx(kx), Some(slot)) =
                    (record.reading(Field::Kx), block.type_code(), row.first_mut())
                {
                    #[allow(clippy::cast_precision_loss)]
                    let code = *kx as f32;
                    *slot = code;
                }
                for v in row {
                    data.f32(v);
                }
            }
            write_record(&mut self.inner, &data.into_bytes())?;
        }
        Ok(())
    }

    fn write_sensor(&mut self, table: &ObservationTable, sensor: &SensorInfo) -> Result<()> {
        let nchanl = sensor.channels.len();
        let mut header = PayloadWriter::default();
        header
            .text(&sensor.isis, 20)
            .text(&sensor.platform, 10)
            .text(&sensor.obstype, 10)
            .i32(sensor.jiter)
            .count(nchanl)?
            .count(sensor.npred)?
            .i32(table.idate())
            .count(sensor.ireal)?
            .count(sensor.ipchan)?
            .i32(sensor.iextra)
            .count(sensor.jextra)?
            .text("", 20);
        write_record(&mut self.inner, &header.into_bytes())?;

        for ch in &sensor.channels {
            let mut rec = PayloadWriter::default();
            rec.f32(ch.freq)
                .f32(ch.pol)
                .f32(ch.wave)
                .f32(ch.varch)
                .f32(ch.tlap)
                .i32(ch.iuse)
                .i32(ch.nuchan)
                .i32(ch.ich);
            write_record(&mut self.inner, &rec.into_bytes())?;
        }

        if nchanl == 0 {
            return Ok(());
        }
        for block in table.blocks() {
            self.write_locations(block, sensor)?;
        }
        Ok(())
    }

    fn write_locations(&mut self, block: &ObservationBlock, sensor: &SensorInfo) -> Result<()> {
        let nchanl = sensor.channels.len();
        if block.len() % nchanl != 0 {
            return Err(Error::InvalidInput(format!(
                "block {} has {} records, not a multiple of {nchanl} channels",
                block.key(),
                block.len()
            )));
        }
        let width = sensor
            .record_width()
            .ok_or_else(|| Error::InvalidInput(format!("sensor {} record width overflows", sensor.isis)))?;
        let stride = sensor.channel_stride();
        for location in block.records().chunks(nchanl) {
            let mut values = vec![0.0_f32; width];
            fill(&mut values[..sensor.ireal], &location[0], |s| match s {
                Source::Column(c) => Some(c),
                _ => None,
            });
            for (j, record) in location.iter().enumerate() {
                let start = sensor.ireal + j * stride;
                fill(&mut values[start..start + sensor.ipchan], record, |s| match s {
                    Source::Channel(c) => Some(c),
                    _ => None,
                });
            }
            let mut payload = PayloadWriter::default();
            for v in values {
                payload.f32(v);
            }
            write_record(&mut self.inner, &payload.into_bytes())?;
        }
        Ok(())
    }
}

/// Copy a record's readings into `slots` at the columns `column` selects.
fn fill(slots: &mut [f32], record: &ObservationRecord, column: impl Fn(Source) -> Option<usize>) {
    let layout: &Layout = record.layout();
    for (spec, reading) in layout.specs().iter().zip(record.readings()) {
        if matches!(reading, Reading::Missing(Sentinel::Absent)) {
            continue;
        }
        if let Some(slot) = column(spec.source).and_then(|c| slots.get_mut(c)) {
            *slot = reading.to_raw();
        }
    }
}

/// Encode a table into a byte vector.
///
/// # Errors
///
/// See [`DiagnosticWriter::write_table`].
pub fn encode_to_vec(table: &ObservationTable) -> Result<Vec<u8>> {
    let mut writer = DiagnosticWriter::new(Vec::new());
    writer.write_table(table)?;
    Ok(writer.into_inner())
}
