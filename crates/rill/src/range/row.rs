//! Lazy cursor over durable chunk rows.

use super::DataRange;
use crate::cold::ColdStore;
use crate::error::{Result, StoreError};
use crate::model::{Coordinate, Datapoint, DatapointArray};

/// Iterates a coordinate's durable datapoints from an absolute start index,
/// fetching and decoding one chunk row per SQL query.
///
/// The cursor validates chunk contiguity as it goes: a chunk whose implied
/// start index lies past the cursor means a missing row, reported as
/// [`StoreError::Corruption`].
pub(crate) struct RowRange {
    cold: ColdStore,
    coordinate: Coordinate,
    /// Next absolute index to yield.
    cursor: i64,
    buf: DatapointArray,
    pos: usize,
    closed: bool,
}

impl RowRange {
    pub(crate) fn new(cold: ColdStore, coordinate: Coordinate, start: i64) -> Self {
        Self {
            cold,
            coordinate,
            cursor: start,
            buf: DatapointArray::new(),
            pos: 0,
            closed: false,
        }
    }

    /// Fetches the chunk covering the cursor. Returns false at the durable
    /// end.
    fn refill(&mut self) -> Result<bool> {
        let Some(chunk) = self.cold.chunk_after(&self.coordinate, self.cursor)? else {
            return Ok(false);
        };
        let start = chunk.start_index();
        if start > self.cursor {
            return Err(StoreError::Corruption {
                stream: self.coordinate.stream.clone(),
                substream: self.coordinate.substream.clone(),
                end_index: chunk.end_index,
                reason: format!(
                    "chunk starts at index {start} but {} was expected",
                    self.cursor
                ),
            });
        }
        let skip = (self.cursor - start) as usize;
        self.buf = chunk.data.index_range(skip, chunk.data.len());
        self.pos = 0;
        Ok(true)
    }
}

impl DataRange for RowRange {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        if self.closed {
            return Ok(None);
        }
        if self.pos >= self.buf.len() && !self.refill()? {
            return Ok(None);
        }
        let point = self.buf.as_slice()[self.pos].clone();
        self.pos += 1;
        self.cursor += 1;
        Ok(Some(point))
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        if self.closed {
            return Ok(None);
        }
        if self.pos >= self.buf.len() && !self.refill()? {
            return Ok(None);
        }
        let rest = self.buf.index_range(self.pos, self.buf.len());
        self.cursor += rest.len() as i64;
        self.pos = self.buf.len();
        Ok(Some(rest))
    }

    fn close(&mut self) {
        self.closed = true;
        self.buf = DatapointArray::new();
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Batch;
    use serde_json::json;
    use tempfile::TempDir;

    fn array(ts: &[f64]) -> DatapointArray {
        ts.iter()
            .map(|&t| Datapoint::new(t, json!(t)))
            .collect::<Vec<_>>()
            .into()
    }

    fn seeded_store(dir: &TempDir) -> ColdStore {
        let cold = ColdStore::open(&dir.path().join("cold.db")).unwrap();
        let coordinate = Coordinate::new("s", "");
        cold.write_batches(&[
            Batch::new(coordinate.clone(), 0, array(&[1.0, 2.0])),
            Batch::new(coordinate.clone(), 2, array(&[3.0, 4.0])),
            Batch::new(coordinate, 4, array(&[5.0])),
        ])
        .unwrap();
        cold
    }

    #[test]
    fn test_iterates_across_chunks() {
        let dir = TempDir::new().unwrap();
        let cold = seeded_store(&dir);
        let mut range = RowRange::new(cold, Coordinate::new("s", ""), 0);

        let mut out = Vec::new();
        while let Some(point) = range.next().unwrap() {
            out.push(point.t);
        }
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_start_mid_chunk_skips_prefix() {
        let dir = TempDir::new().unwrap();
        let cold = seeded_store(&dir);
        let mut range = RowRange::new(cold, Coordinate::new("s", ""), 3);

        assert_eq!(range.next().unwrap().unwrap().t, 4.0);
        assert_eq!(range.next().unwrap().unwrap().t, 5.0);
        assert!(range.next().unwrap().is_none());
    }

    #[test]
    fn test_next_array_yields_one_chunk_at_a_time() {
        let dir = TempDir::new().unwrap();
        let cold = seeded_store(&dir);
        let mut range = RowRange::new(cold, Coordinate::new("s", ""), 1);

        let first = range.next_array().unwrap().unwrap();
        assert_eq!(first.start_time(), Some(2.0));
        assert_eq!(first.len(), 1);
        let second = range.next_array().unwrap().unwrap();
        assert_eq!(second.len(), 2);
        let third = range.next_array().unwrap().unwrap();
        assert_eq!(third.len(), 1);
        assert!(range.next_array().unwrap().is_none());
    }

    #[test]
    fn test_missing_chunk_is_corruption() {
        let dir = TempDir::new().unwrap();
        let cold = ColdStore::open(&dir.path().join("cold.db")).unwrap();
        let coordinate = Coordinate::new("s", "");
        // a gap: indices [2, 4) were never written
        cold.write_batches(&[
            Batch::new(coordinate.clone(), 0, array(&[1.0, 2.0])),
            Batch::new(coordinate.clone(), 4, array(&[5.0, 6.0])),
        ])
        .unwrap();

        let mut range = RowRange::new(cold, coordinate, 0);
        assert_eq!(range.next().unwrap().unwrap().t, 1.0);
        assert_eq!(range.next().unwrap().unwrap().t, 2.0);
        let err = range.next().unwrap_err();
        assert!(matches!(err, StoreError::Corruption { end_index: 6, .. }));
    }

    #[test]
    fn test_close_stops_iteration() {
        let dir = TempDir::new().unwrap();
        let cold = seeded_store(&dir);
        let mut range = RowRange::new(cold, Coordinate::new("s", ""), 0);
        assert!(range.next().unwrap().is_some());
        range.close();
        assert!(range.next().unwrap().is_none());
        range.close();
        assert!(range.next_array().unwrap().is_none());
    }
}
