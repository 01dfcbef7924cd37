//! Versioned binary encoding for datapoint chunks.
//!
//! A chunk is the opaque blob stored per batch in the cold tier and embedded
//! in hot-tier journal frames. The layout is little-endian:
//!
//! ```text
//! [version: u8 = 1]
//! [count:   u32]
//! count times:
//!   [t:          f64]
//!   [sender len: u16][sender bytes (utf-8)]
//!   [data len:   u32][data bytes (JSON)]
//! ```
//!
//! The version tag is checked on decode so historical chunks stay readable
//! across format upgrades; an unknown version is surfaced as
//! [`StoreError::UnsupportedVersion`], never silently skipped.

use crate::error::{Result, StoreError};
use crate::model::{Datapoint, DatapointArray};

/// Current chunk encoding version.
pub(crate) const CHUNK_VERSION: u8 = 1;

impl DatapointArray {
    /// Encodes the array into its stable binary chunk form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16 + self.len() * 32);
        buf.push(CHUNK_VERSION);
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for point in self.iter() {
            buf.extend_from_slice(&point.t.to_le_bytes());
            put_str_u16(&mut buf, &point.sender)?;
            let payload = serde_json::to_vec(&point.data)?;
            put_bytes_u32(&mut buf, &payload);
        }
        Ok(buf)
    }

    /// Decodes a binary chunk produced by [`encode`](DatapointArray::encode).
    pub fn decode(bytes: &[u8]) -> Result<DatapointArray> {
        let mut reader = ByteReader::new(bytes);
        let version = reader.u8()?;
        if version != CHUNK_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        let count = reader.u32()? as usize;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let t = reader.f64()?;
            let sender = reader.str_u16()?;
            let payload = reader.bytes_u32()?;
            let data = serde_json::from_slice(payload)?;
            points.push(Datapoint { t, data, sender });
        }
        if !reader.is_empty() {
            return Err(StoreError::Decode(format!(
                "{} trailing bytes after chunk",
                reader.remaining()
            )));
        }
        Ok(points.into())
    }
}

/// Appends a u16-length-prefixed UTF-8 string.
///
/// A string longer than the prefix can represent is rejected outright:
/// truncating the prefix while writing all the bytes would desynchronize the
/// frame, and the checksum (computed over the same bytes) would not catch it.
pub(crate) fn put_str_u16(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.len() > u16::MAX as usize {
        return Err(StoreError::Decode(format!(
            "string of {} bytes does not fit a u16 length prefix",
            s.len()
        )));
    }
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Appends a u32-length-prefixed byte slice.
pub(crate) fn put_bytes_u32(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Cursor over a binary frame with bounds-checked little-endian reads.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(StoreError::Decode(format!(
                "truncated frame: wanted {n} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn str_u16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::Decode(format!("invalid utf-8 in frame: {e}")))
    }

    pub(crate) fn bytes_u32(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}
