//! Fortran unformatted sequential records (big-endian)
//!
//! Each record is `u32 length | payload | u32 length`. The reader tracks the
//! byte offset of every record so errors can point into the file.

use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, ErrorKind, Read, Write};

/// Sequential record reader over any byte stream.
pub(crate) struct RecordReader<R> {
    inner: R,
    offset: u64,
}

/// One record and the offset of its leading marker.
#[derive(Debug)]
pub(crate) struct RawRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl<R: Read> RecordReader<R> {
    pub(crate) const fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Offset of the next record
    pub(crate) const fn offset(&self) -> u64 {
        self.offset
    }

    /// Next record, or `None` at a clean end of stream.
    pub(crate) fn next_record(&mut self) -> Result<Option<RawRecord>> {
        let start = self.offset;
        let mut marker = [0u8; 4];
        let got = read_marker(&mut self.inner, &mut marker)?;
        if got == 0 {
            return Ok(None);
        }
        if got < marker.len() {
            return Err(Error::TruncatedRecord {
                offset: start,
                needed: 4,
                available: got,
            });
        }
        self.offset += 4;

        let declared = BigEndian::read_i32(&marker);
        let len = usize::try_from(declared).map_err(|_| Error::InvalidHeader {
            offset: start,
            reason: format!("negative record length {declared}"),
        })?;

        let mut payload = Vec::new();
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut payload)?;
        self.offset += read as u64;
        if read < len {
            return Err(Error::TruncatedRecord {
                offset: start,
                needed: len + 8,
                available: read + 4,
            });
        }

        let mut trailer = [0u8; 4];
        let got = read_marker(&mut self.inner, &mut trailer)?;
        self.offset += got as u64;
        if got < trailer.len() {
            return Err(Error::TruncatedRecord {
                offset: start,
                needed: len + 8,
                available: len + 4 + got,
            });
        }
        if trailer != marker {
            return Err(Error::InvalidHeader {
                offset: start,
                reason: format!(
                    "record markers disagree: leading {declared}, trailing {}",
                    BigEndian::read_i32(&trailer)
                ),
            });
        }

        Ok(Some(RawRecord {
            offset: start,
            payload,
        }))
    }
}

/// Fill a length marker, returning how many bytes arrived before end of
/// stream. Zero means a clean end between records.
fn read_marker<R: Read>(reader: &mut R, buf: &mut [u8; 4]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Write one record with its length markers.
pub(crate) fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = i32::try_from(payload.len())
        .map_err(|_| Error::InvalidInput(format!("record of {} bytes is too long", payload.len())))?;
    writer.write_i32::<BigEndian>(len)?;
    writer.write_all(payload)?;
    writer.write_i32::<BigEndian>(len)?;
    Ok(())
}

/// Big-endian cursor over a record payload.
pub(crate) struct Payload<'a> {
    cursor: Cursor<&'a [u8]>,
    offset: u64,
}

impl<'a> Payload<'a> {
    pub(crate) fn new(record: &'a RawRecord) -> Self {
        Self {
            cursor: Cursor::new(record.payload.as_slice()),
            offset: record.offset,
        }
    }

    fn pos(&self) -> usize {
        usize::try_from(self.cursor.position()).unwrap_or(usize::MAX)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.pos())
    }

    /// Fail with a truncation error unless `n` more bytes are available.
    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::TruncatedRecord {
                offset: self.offset,
                needed: self.pos().saturating_add(n),
                available: self.cursor.get_ref().len(),
            });
        }
        Ok(())
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.cursor.read_i32::<BigEndian>()?)
    }

    pub(crate) fn f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.cursor.read_f32::<BigEndian>()?)
    }

    /// Count field: a non-negative `i32`.
    pub(crate) fn count(&mut self, name: &str) -> Result<usize> {
        let v = self.i32()?;
        usize::try_from(v).map_err(|_| Error::InvalidHeader {
            offset: self.offset,
            reason: format!("{name} is negative ({v})"),
        })
    }

    /// Fixed-width character field with trailing blanks and NULs removed.
    pub(crate) fn text(&mut self, width: usize) -> Result<String> {
        self.need(width)?;
        let mut raw = vec![0u8; width];
        self.cursor.read_exact(&mut raw)?;
        Ok(String::from_utf8_lossy(&raw)
            .trim_end_matches(|c: char| c == ' ' || c == '\0')
            .to_string())
    }

    /// Next `n` raw reals
    pub(crate) fn reals(&mut self, n: usize) -> Result<Vec<f32>> {
        let bytes = n.checked_mul(4).ok_or_else(|| Error::InvalidHeader {
            offset: self.offset,
            reason: format!("{n} reals overflow the record size"),
        })?;
        self.need(bytes)?;
        let mut out = vec![0f32; n];
        self.cursor.read_f32_into::<BigEndian>(&mut out)?;
        Ok(out)
    }
}

/// Builder for a record payload.
#[derive(Default)]
pub(crate) struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    pub(crate) fn i32(&mut self, v: i32) -> &mut Self {
        let mut word = [0u8; 4];
        BigEndian::write_i32(&mut word, v);
        self.bytes.extend_from_slice(&word);
        self
    }

    pub(crate) fn f32(&mut self, v: f32) -> &mut Self {
        let mut word = [0u8; 4];
        BigEndian::write_f32(&mut word, v);
        self.bytes.extend_from_slice(&word);
        self
    }

    /// Blank-padded (truncated) character field.
    pub(crate) fn text(&mut self, s: &str, width: usize) -> &mut Self {
        let mut field = vec![b' '; width];
        let src = s.as_bytes();
        let n = src.len().min(width);
        field[..n].copy_from_slice(&src[..n]);
        self.bytes.extend_from_slice(&field);
        self
    }

    pub(crate) fn count(&mut self, n: usize) -> Result<&mut Self> {
        let v = i32::try_from(n).map_err(|_| Error::InvalidInput(format!("count {n} exceeds i32")))?;
        Ok(self.i32(v))
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
