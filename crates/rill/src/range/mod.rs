//! Composable range iterators over datapoints.
//!
//! # Architecture
//!
//! Every query the engine answers is expressed as a pipeline of
//! [`DataRange`] values: a source at the bottom (an in-memory array, a lazy
//! cold-tier cursor, or the tier-bridging [`LiveRange`]) wrapped by
//! decorators that bound it by count ([`NumRange`]) or by time window
//! ([`TimedRange`]). Sources are fallible - a cold-tier fetch can hit I/O or
//! corruption mid-iteration - so `next` returns `Result`.
//!
//! Ranges also expose `next_array`, which yields datapoints a chunk at a
//! time so bulk consumers avoid per-point overhead.

mod live;
mod row;

pub(crate) use live::LiveRange;
pub(crate) use row::RowRange;

use crate::error::Result;
use crate::model::{Datapoint, DatapointArray};

/// An iterator over a range of datapoints.
///
/// Exhaustion is signalled by `Ok(None)`. After [`close`](DataRange::close)
/// both `next` and `next_array` return `Ok(None)`; closing is idempotent.
pub trait DataRange: Send {
    /// Yields the next datapoint.
    fn next(&mut self) -> Result<Option<Datapoint>>;

    /// Yields the next run of datapoints, at most one underlying chunk at a
    /// time. Returns `Ok(None)` once exhausted, never an empty array.
    fn next_array(&mut self) -> Result<Option<DatapointArray>>;

    /// Releases underlying resources. Idempotent.
    fn close(&mut self);
}

/// A heap-allocated range, the unit of composition.
pub type BoxedRange = Box<dyn DataRange>;

/// The range over nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRange;

impl DataRange for EmptyRange {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        Ok(None)
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        Ok(None)
    }

    fn close(&mut self) {}
}

/// A range over an in-memory array, used when a query is fully served by
/// the hot tier's cached window.
#[derive(Debug)]
pub struct ArrayRange {
    data: DatapointArray,
    pos: usize,
}

impl ArrayRange {
    /// Creates a range over `data`.
    pub fn new(data: DatapointArray) -> Self {
        Self { data, pos: 0 }
    }
}

impl DataRange for ArrayRange {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        let point = self.data.as_slice().get(self.pos).cloned();
        if point.is_some() {
            self.pos += 1;
        }
        Ok(point)
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let rest = self.data.index_range(self.pos, self.data.len());
        self.pos = self.data.len();
        Ok(Some(rest))
    }

    fn close(&mut self) {
        self.pos = self.data.len();
    }
}

/// Bounds an inner range to at most `limit` datapoints.
pub struct NumRange {
    inner: BoxedRange,
    remaining: i64,
}

impl NumRange {
    /// Wraps `inner`, yielding at most `limit` datapoints (none when
    /// `limit <= 0`).
    pub fn new(inner: BoxedRange, limit: i64) -> Self {
        Self {
            inner,
            remaining: limit.max(0),
        }
    }

    /// Advances past `n` datapoints without counting them against the
    /// limit. Stops early at exhaustion.
    pub fn skip(&mut self, n: i64) -> Result<()> {
        for _ in 0..n {
            if self.inner.next()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

impl DataRange for NumRange {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        if self.remaining <= 0 {
            return Ok(None);
        }
        let point = self.inner.next()?;
        if point.is_some() {
            self.remaining -= 1;
        }
        Ok(point)
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        if self.remaining <= 0 {
            return Ok(None);
        }
        let Some(array) = self.inner.next_array()? else {
            return Ok(None);
        };
        let take = (self.remaining as usize).min(array.len());
        self.remaining -= take as i64;
        Ok(Some(array.index_range(0, take)))
    }

    fn close(&mut self) {
        self.remaining = 0;
        self.inner.close();
    }
}

/// Bounds an inner range to the time window `(t1, t2]`.
///
/// Datapoints at or before `t1` are skipped; the first datapoint past `t2`
/// ends the range and closes the inner one. `t2 <= 0` means unbounded
/// above.
pub struct TimedRange {
    inner: BoxedRange,
    t1: f64,
    t2: f64,
    done: bool,
}

impl TimedRange {
    /// Wraps `inner` in the window `(t1, t2]`.
    pub fn new(inner: BoxedRange, t1: f64, t2: f64) -> Self {
        Self {
            inner,
            t1,
            t2,
            done: false,
        }
    }

    fn bounded_above(&self) -> bool {
        self.t2 > 0.0
    }
}

impl DataRange for TimedRange {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let Some(point) = self.inner.next()? else {
                return Ok(None);
            };
            if point.t <= self.t1 {
                continue;
            }
            if self.bounded_above() && point.t > self.t2 {
                self.done = true;
                self.inner.close();
                return Ok(None);
            }
            return Ok(Some(point));
        }
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let Some(array) = self.inner.next_array()? else {
                return Ok(None);
            };
            let trimmed = if self.bounded_above() {
                array.t_range(self.t1, self.t2)
            } else {
                array.t_start(self.t1)
            };
            let finished = self.bounded_above()
                && array.end_time().is_some_and(|t| t > self.t2);
            if finished {
                self.done = true;
                self.inner.close();
            }
            if !trimmed.is_empty() {
                return Ok(Some(trimmed));
            }
            if finished {
                return Ok(None);
            }
        }
    }

    fn close(&mut self) {
        self.done = true;
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn array(ts: &[f64]) -> DatapointArray {
        ts.iter()
            .map(|&t| Datapoint::new(t, json!(t)))
            .collect::<Vec<_>>()
            .into()
    }

    fn drain(range: &mut dyn DataRange) -> Vec<f64> {
        let mut out = Vec::new();
        while let Some(point) = range.next().unwrap() {
            out.push(point.t);
        }
        out
    }

    #[test]
    fn test_empty_range() {
        let mut range = EmptyRange;
        assert!(range.next().unwrap().is_none());
        assert!(range.next_array().unwrap().is_none());
    }

    #[test]
    fn test_array_range() {
        let mut range = ArrayRange::new(array(&[1.0, 2.0, 3.0]));
        assert_eq!(range.next().unwrap().unwrap().t, 1.0);
        let rest = range.next_array().unwrap().unwrap();
        assert_eq!(rest.len(), 2);
        assert!(range.next().unwrap().is_none());
        assert!(range.next_array().unwrap().is_none());
    }

    #[test]
    fn test_array_range_close_is_final() {
        let mut range = ArrayRange::new(array(&[1.0, 2.0]));
        range.close();
        assert!(range.next().unwrap().is_none());
        range.close();
        assert!(range.next().unwrap().is_none());
    }

    #[test]
    fn test_num_range_bounds() {
        let inner = Box::new(ArrayRange::new(array(&[1.0, 2.0, 3.0, 4.0])));
        let mut range = NumRange::new(inner, 2);
        assert_eq!(drain(&mut range), vec![1.0, 2.0]);
    }

    #[test]
    fn test_num_range_skip() {
        let inner = Box::new(ArrayRange::new(array(&[1.0, 2.0, 3.0, 4.0])));
        let mut range = NumRange::new(inner, 2);
        range.skip(1).unwrap();
        assert_eq!(drain(&mut range), vec![2.0, 3.0]);
    }

    #[test]
    fn test_num_range_truncates_arrays() {
        let inner = Box::new(ArrayRange::new(array(&[1.0, 2.0, 3.0])));
        let mut range = NumRange::new(inner, 2);
        let out = range.next_array().unwrap().unwrap();
        assert_eq!(out.len(), 2);
        assert!(range.next_array().unwrap().is_none());
    }

    #[test]
    fn test_timed_range_window_is_left_exclusive() {
        let inner = Box::new(ArrayRange::new(array(&[1.0, 2.0, 3.0, 4.0, 5.0])));
        let mut range = TimedRange::new(inner, 2.0, 4.0);
        assert_eq!(drain(&mut range), vec![3.0, 4.0]);
    }

    #[test]
    fn test_timed_range_unbounded_above() {
        let inner = Box::new(ArrayRange::new(array(&[1.0, 2.0, 3.0])));
        let mut range = TimedRange::new(inner, 1.0, 0.0);
        assert_eq!(drain(&mut range), vec![2.0, 3.0]);
    }

    #[test]
    fn test_timed_range_next_array_trims_window() {
        let inner = Box::new(ArrayRange::new(array(&[1.0, 2.0, 3.0, 4.0])));
        let mut range = TimedRange::new(inner, 1.0, 3.0);
        let out = range.next_array().unwrap().unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.start_time(), Some(2.0));
        assert!(range.next_array().unwrap().is_none());
    }
}
