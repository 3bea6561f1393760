//! Diagnostic file decoder
//!
//! Turns one byte stream into an [`ObservationTable`]. The decoder owns no
//! files: callers hand it any [`Read`] and keep ownership of the handle.
//!
//! ```rust
//! use diag_impact::decoder::DiagnosticDecoder;
//! use std::io::Cursor;
//!
//! let decoder = DiagnosticDecoder::default();
//! // An empty stream carries no family marker.
//! assert!(decoder.decode(Cursor::new(Vec::new()), None).is_err());
//! ```

mod fortran;

pub(crate) use fortran::{write_record, PayloadWriter};

use crate::schema::{ChannelAttr, Framing, Layout, Reading, RecordSchema, SchemaRegistry, Sentinel, Source};
use crate::table::{BlockKey, ChannelInfo, DecodeWarning, ObservationRecord, ObservationTable, SensorInfo, TypeCode};
use crate::{Error, Result};
use fortran::{Payload, RawRecord, RecordReader};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

/// Payload length of the conventional date record.
pub const DATE_RECORD_LEN: usize = 4;
/// Payload length of the conventional block header.
pub const BLOCK_HEADER_LEN: usize = 19;
/// Payload length of the radiance sensor header.
pub const SENSOR_HEADER_LEN: usize = 92;
/// Payload length of one radiance channel record.
pub const CHANNEL_RECORD_LEN: usize = 32;
/// Width of a conventional station id.
pub const STATION_ID_LEN: usize = 8;
/// Largest payload a record marker (`i32`) can declare.
pub const MAX_RECORD_LEN: usize = 0x7fff_ffff;

// Channel tables are preallocated up to this many entries; larger declared
// counts grow as records actually arrive.
const CHANNEL_PREALLOC: usize = 4096;

/// Framing implied by the first record's payload length.
#[must_use]
pub const fn infer_framing(first_record_len: usize) -> Option<Framing> {
    match first_record_len {
        DATE_RECORD_LEN => Some(Framing::Blocked),
        n if n >= SENSOR_HEADER_LEN => Some(Framing::Sensor),
        _ => None,
    }
}

/// Decoder over a schema registry.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticDecoder {
    registry: SchemaRegistry,
}

impl DiagnosticDecoder {
    /// Decoder over the built-in families.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder over a custom registry.
    #[must_use]
    pub const fn with_registry(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Registered families
    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Decode one diagnostic file.
    ///
    /// The family is inferred from the first record; `hint` is used when the
    /// first record does not identify it.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownFamily`] if neither the stream nor the hint names a
    ///   registered family
    /// - [`Error::TruncatedRecord`] if the stream ends inside a record
    /// - [`Error::InvalidHeader`] for malformed headers or record markers
    pub fn decode<R: Read>(&self, reader: R, hint: Option<&str>) -> Result<ObservationTable> {
        let span = info_span!("decode", hint = hint.unwrap_or("-"));
        let _guard = span.enter();

        let hinted = hint.map(|tag| self.registry.schema(tag)).transpose()?;
        let mut records = RecordReader::new(reader);
        let Some(first) = records.next_record()? else {
            return Err(match hinted {
                Some(_) => Error::InvalidHeader {
                    offset: 0,
                    reason: "empty stream".to_string(),
                },
                None => Error::UnknownFamily("empty stream".to_string()),
            });
        };

        let schema = self.resolve(infer_framing(first.payload.len()), hinted, first.payload.len())?;
        debug!(family = schema.tag(), first_len = first.payload.len(), "family resolved");
        let table = match schema.framing() {
            Framing::Blocked => decode_blocked(schema, &first, &mut records)?,
            Framing::Sensor => decode_sensor(schema, &first, &mut records)?,
        };
        debug!(records = table.len(), blocks = table.blocks().len(), "decode finished");
        Ok(table)
    }

    fn resolve<'a>(
        &'a self,
        inferred: Option<Framing>,
        hinted: Option<&'a RecordSchema>,
        first_len: usize,
    ) -> Result<&'a RecordSchema> {
        match (inferred, hinted) {
            (Some(framing), Some(schema)) if schema.framing() == framing => Ok(schema),
            (Some(framing), hinted) => {
                let schema = self.registry.for_framing(framing).ok_or_else(|| {
                    Error::UnknownFamily(format!("no family registered for {framing:?} framing"))
                })?;
                if let Some(h) = hinted {
                    warn!(hint = h.tag(), inferred = schema.tag(), "family hint contradicts stream");
                }
                Ok(schema)
            }
            (None, Some(schema)) => Ok(schema),
            (None, None) => Err(Error::UnknownFamily(format!(
                "first record of {first_len} bytes does not identify a family"
            ))),
        }
    }
}

fn invalid(offset: u64, reason: impl Into<String>) -> Error {
    Error::InvalidHeader {
        offset,
        reason: reason.into(),
    }
}

fn table_for(schema: &RecordSchema, idate: i32, offset: u64) -> Result<ObservationTable> {
    ObservationTable::new(schema.tag(), idate)
        .map_err(|_| invalid(offset, format!("invalid cycle date {idate}")))
}

/// Read a typed value for one spec from a location/channel slice pair.
fn read_field(
    source: Source,
    present: bool,
    location: &[f32],
    channel: &[f32],
    info: Option<&ChannelInfo>,
) -> Reading {
    if !present {
        return Reading::Missing(Sentinel::Absent);
    }
    match source {
        Source::Column(c) => location.get(c).copied().map_or(Reading::Missing(Sentinel::Absent), Reading::from_raw),
        Source::Channel(c) => channel.get(c).copied().map_or(Reading::Missing(Sentinel::Absent), Reading::from_raw),
        Source::ChannelTable(attr) => info.map_or(Reading::Missing(Sentinel::Absent), |ch| match attr {
            ChannelAttr::Iuse => Reading::from_int(ch.iuse),
            ChannelAttr::Number => Reading::from_int(ch.nuchan),
        }),
    }
}

fn readings(layout: &Layout, location: &[f32], channel: &[f32], info: Option<&ChannelInfo>) -> Vec<Reading> {
    layout
        .specs()
        .iter()
        .enumerate()
        .map(|(i, spec)| read_field(spec.source, layout.is_present_at(i), location, channel, info))
        .collect()
}

/// Reals and payload bytes of a conventional data record, `None` when the
/// declared counts cannot fit in one record.
fn block_len(nobs: usize, ninfo: usize) -> Option<(usize, usize)> {
    let row = ninfo.checked_mul(4)?.checked_add(STATION_ID_LEN)?;
    let bytes = nobs.checked_mul(row).filter(|&n| n <= MAX_RECORD_LEN)?;
    Some((nobs.checked_mul(ninfo)?, bytes))
}

fn decode_blocked<R: Read>(
    schema: &RecordSchema,
    first: &RawRecord,
    records: &mut RecordReader<R>,
) -> Result<ObservationTable> {
    if first.payload.len() != DATE_RECORD_LEN {
        return Err(invalid(
            first.offset,
            format!("date record has {} bytes, expected {DATE_RECORD_LEN}", first.payload.len()),
        ));
    }
    let idate = Payload::new(first).i32()?;
    let mut table = table_for(schema, idate, first.offset)?;

    while let Some(header) = records.next_record()? {
        if header.payload.is_empty() {
            debug!(offset = header.offset, "end marker");
            break;
        }
        if header.payload.len() != BLOCK_HEADER_LEN {
            return Err(invalid(
                header.offset,
                format!("block header has {} bytes, expected {BLOCK_HEADER_LEN}", header.payload.len()),
            ));
        }
        let mut p = Payload::new(&header);
        let variable = p.text(3)?.trim().to_string();
        let _nchar = p.i32()?;
        let ninfo = p.count("ninfo")?;
        let nobs = p.count("nobs")?;
        let _mype = p.i32()?;

        let (cells, needed) = block_len(nobs, ninfo).ok_or_else(|| {
            invalid(
                header.offset,
                format!("block '{variable}' declares {nobs} records of {ninfo} reals, beyond any record length"),
            )
        })?;
        let data = records.next_record()?.ok_or_else(|| Error::TruncatedRecord {
            offset: records.offset(),
            needed: needed + 8,
            available: 0,
        })?;
        if data.payload.len() < needed {
            return Err(Error::TruncatedRecord {
                offset: data.offset,
                needed,
                available: data.payload.len(),
            });
        }
        if data.payload.len() > needed {
            return Err(invalid(
                data.offset,
                format!(
                    "data record for '{variable}' has {} bytes, header declares {needed}",
                    data.payload.len()
                ),
            ));
        }

        if !schema.knows_variable(&variable) {
            let warning = DecodeWarning {
                offset: header.offset,
                token: variable,
                records: nobs,
            };
            warn!(offset = warning.offset, token = %warning.token, skipped = nobs, "unknown variable token, block skipped");
            table.warn(warning);
            continue;
        }
        if nobs > 0 && ninfo == 0 {
            return Err(invalid(header.offset, format!("block '{variable}' has no columns")));
        }

        let layout = schema.shared_layout(&variable, ninfo, 0);
        let mut p = Payload::new(&data);
        let stations = (0..nobs).map(|_| p.text(STATION_ID_LEN)).collect::<Result<Vec<_>>>()?;
        let values = p.reals(cells)?;
        for (station, row) in stations.into_iter().zip(values.chunks_exact(ninfo.max(1))) {
            #[allow(clippy::cast_possible_truncation)]
            let kx = row[0].round() as i32;
            let obs = ObservationRecord::new(Arc::clone(&layout), Some(station), readings(&layout, row, &[], None))?;
            table.push(BlockKey::new(variable.as_str(), kx), &layout, obs);
        }
        debug!(offset = header.offset, variable = %variable, nobs, ninfo, "block decoded");
    }
    Ok(table)
}

fn decode_sensor<R: Read>(
    schema: &RecordSchema,
    first: &RawRecord,
    records: &mut RecordReader<R>,
) -> Result<ObservationTable> {
    let mut p = Payload::new(first);
    let isis = p.text(20)?;
    let platform = p.text(10)?.trim().to_string();
    let obstype = p.text(10)?.trim().to_string();
    let jiter = p.i32()?;
    let nchanl = p.count("nchanl")?;
    let npred = p.count("npred")?;
    let idate = p.i32()?;
    let ireal = p.count("ireal")?;
    let ipchan = p.count("ipchan")?;
    let iextra = p.i32()?;
    let jextra = p.count("jextra")?;

    let mut channels = Vec::with_capacity(nchanl.min(CHANNEL_PREALLOC));
    for _ in 0..nchanl {
        let record = records.next_record()?.ok_or_else(|| Error::TruncatedRecord {
            offset: records.offset(),
            needed: CHANNEL_RECORD_LEN + 8,
            available: 0,
        })?;
        if record.payload.len() != CHANNEL_RECORD_LEN {
            return Err(invalid(
                record.offset,
                format!("channel record has {} bytes, expected {CHANNEL_RECORD_LEN}", record.payload.len()),
            ));
        }
        let mut c = Payload::new(&record);
        channels.push(ChannelInfo {
            freq: c.f32()?,
            pol: c.f32()?,
            wave: c.f32()?,
            varch: c.f32()?,
            tlap: c.f32()?,
            iuse: c.i32()?,
            nuchan: c.i32()?,
            ich: c.i32()?,
        });
    }

    let sensor = SensorInfo {
        isis,
        platform,
        obstype,
        jiter,
        npred,
        ireal,
        ipchan,
        iextra,
        jextra,
        channels,
    };
    let width = sensor
        .record_width()
        .filter(|w| w.checked_mul(4).is_some_and(|n| n <= MAX_RECORD_LEN))
        .ok_or_else(|| {
            invalid(
                first.offset,
                format!(
                    "sensor '{}' declares records beyond any record length ({nchanl} channels of {ipchan}+{npred} reals)",
                    sensor.isis
                ),
            )
        })?;
    let needed = width * 4;
    let stride = sensor.channel_stride();
    let layout = schema.shared_layout(&sensor.obstype, ireal, ipchan);
    let key = BlockKey::new(sensor.obstype.as_str(), TypeCode::Platform(sensor.platform.clone()));
    let mut table = table_for(schema, idate, first.offset)?.with_sensor(sensor.clone());

    let mut locations = 0usize;
    while let Some(record) = records.next_record()? {
        if record.payload.is_empty() {
            debug!(offset = record.offset, "end marker");
            break;
        }
        if record.payload.len() < needed {
            return Err(Error::TruncatedRecord {
                offset: record.offset,
                needed,
                available: record.payload.len(),
            });
        }
        if record.payload.len() > needed {
            return Err(invalid(
                record.offset,
                format!("observation record has {} bytes, header declares {needed}", record.payload.len()),
            ));
        }
        let values = Payload::new(&record).reals(width)?;
        let (location, rest) = values.split_at(ireal);
        for (j, info) in sensor.channels.iter().enumerate() {
            let channel = &rest[j * stride..(j + 1) * stride];
            let obs = ObservationRecord::new(
                Arc::clone(&layout),
                None,
                readings(&layout, location, &channel[..ipchan], Some(info)),
            )?;
            table.push(key.clone(), &layout, obs);
        }
        locations += 1;
    }
    debug!(sensor = %sensor.isis, locations, channels = sensor.channels.len(), "sensor decoded");
    Ok(table)
}
