//! Core data model: datapoints, ordered arrays, batches and coordinates.
//!
//! A [`Datapoint`] is the atomic record: a fractional Unix timestamp, an
//! arbitrary JSON payload, and an optional sender path recorded when the
//! writer is not the stream's owner. A [`DatapointArray`] is an ordered
//! sequence of datapoints and carries the slicing, ordering-check, splitting
//! and encoding operations the tiers are built on. A [`Batch`] is the durable
//! unit handed from the hot tier to the cold tier, uniquely keyed by
//! `(stream, substream, end_index)`.
//!
//! Every `(stream, substream)` pair - a [`Coordinate`] - owns an independent
//! zero-based index space: index 0 is the oldest datapoint ever inserted for
//! that coordinate, index `length - 1` the most recent.

mod encoding;

pub(crate) use encoding::{put_bytes_u32, put_str_u16, ByteReader, CHUNK_VERSION};

use serde::{Deserialize, Serialize};

/// A single timestamped record in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Unix timestamp in seconds (fractional).
    pub t: f64,
    /// Arbitrary JSON payload. Schema validation is the caller's concern.
    pub data: serde_json::Value,
    /// Path of the writing principal when the datapoint was written by a
    /// party other than the stream's owner; empty otherwise.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,
}

impl Datapoint {
    /// Creates a datapoint with an empty sender.
    pub fn new(t: f64, data: serde_json::Value) -> Self {
        Self {
            t,
            data,
            sender: String::new(),
        }
    }

    /// Creates a datapoint recording the writing principal's path.
    pub fn with_sender(t: f64, data: serde_json::Value, sender: impl Into<String>) -> Self {
        Self {
            t,
            data,
            sender: sender.into(),
        }
    }
}

/// An ordered sequence of datapoints.
///
/// Within a stored array timestamps are non-decreasing; [`is_timestamp_ordered`]
/// checks the invariant and the insert path rejects batches that break it.
///
/// [`is_timestamp_ordered`]: DatapointArray::is_timestamp_ordered
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatapointArray(Vec<Datapoint>);

impl DatapointArray {
    /// Creates an empty array.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the number of datapoints.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the array holds no datapoints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the datapoints as a slice.
    pub fn as_slice(&self) -> &[Datapoint] {
        &self.0
    }

    /// Iterates over the datapoints in order.
    pub fn iter(&self) -> impl Iterator<Item = &Datapoint> {
        self.0.iter()
    }

    /// Appends a datapoint.
    pub fn push(&mut self, point: Datapoint) {
        self.0.push(point);
    }

    /// Appends all datapoints of `other`.
    pub fn extend(&mut self, other: DatapointArray) {
        self.0.extend(other.0);
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Datapoint] {
        &mut self.0
    }

    /// Timestamp of the first datapoint, if any.
    pub fn start_time(&self) -> Option<f64> {
        self.0.first().map(|p| p.t)
    }

    /// Timestamp of the last datapoint, if any.
    pub fn end_time(&self) -> Option<f64> {
        self.0.last().map(|p| p.t)
    }

    /// Returns true if timestamps are non-decreasing.
    pub fn is_timestamp_ordered(&self) -> bool {
        self.0.windows(2).all(|w| w[0].t <= w[1].t)
    }

    /// Returns the sub-range `[lo, hi)` by position, clamped to the array.
    pub fn index_range(&self, lo: usize, hi: usize) -> DatapointArray {
        let hi = hi.min(self.0.len());
        let lo = lo.min(hi);
        Self(self.0[lo..hi].to_vec())
    }

    /// Position of the first datapoint with timestamp `>= t`, or the length
    /// if none. Requires a timestamp-ordered array.
    pub fn first_at_or_after(&self, t: f64) -> usize {
        self.0.partition_point(|p| p.t < t)
    }

    /// Position of the first datapoint with timestamp `> t`, or the length
    /// if none. Requires a timestamp-ordered array.
    pub fn first_after(&self, t: f64) -> usize {
        self.0.partition_point(|p| p.t <= t)
    }

    /// Returns the datapoints with timestamp strictly after `t`.
    pub fn t_start(&self, t: f64) -> DatapointArray {
        let lo = self.first_after(t);
        Self(self.0[lo..].to_vec())
    }

    /// Returns the datapoints with timestamp at or before `t`.
    pub fn t_end(&self, t: f64) -> DatapointArray {
        let hi = self.first_after(t);
        Self(self.0[..hi].to_vec())
    }

    /// Returns the datapoints in the time window `(t1, t2]`.
    pub fn t_range(&self, t1: f64, t2: f64) -> DatapointArray {
        let lo = self.first_after(t1);
        let hi = self.first_after(t2).max(lo);
        Self(self.0[lo..hi].to_vec())
    }

    /// Splits the array into consecutive pieces of at most `max` datapoints.
    ///
    /// Returns an empty vector for an empty array. `max` of zero is treated
    /// as one.
    pub fn split(&self, max: usize) -> Vec<DatapointArray> {
        let max = max.max(1);
        self.0
            .chunks(max)
            .map(|c| Self(c.to_vec()))
            .collect()
    }
}

impl From<Vec<Datapoint>> for DatapointArray {
    fn from(points: Vec<Datapoint>) -> Self {
        Self(points)
    }
}

impl IntoIterator for DatapointArray {
    type Item = Datapoint;
    type IntoIter = std::vec::IntoIter<Datapoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A `(stream, substream)` pair identifying one independent append-only
/// sequence. The empty substream name denotes the stream's primary channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    /// Stream identifier.
    pub stream: String,
    /// Substream name (empty for the primary channel).
    pub substream: String,
}

impl Coordinate {
    /// Creates a coordinate.
    pub fn new(stream: impl Into<String>, substream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            substream: substream.into(),
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stream, self.substream)
    }
}

/// A contiguous run of datapoints handed from the hot tier to the cold tier.
///
/// Batches are uniquely keyed by `(stream, substream, end_index)`, which makes
/// re-delivery of an identical batch idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Owning coordinate.
    pub coordinate: Coordinate,
    /// Absolute index of the first datapoint in the batch.
    pub start_index: i64,
    /// The datapoints.
    pub data: DatapointArray,
}

impl Batch {
    /// Creates a batch.
    pub fn new(coordinate: Coordinate, start_index: i64, data: DatapointArray) -> Self {
        Self {
            coordinate,
            start_index,
            data,
        }
    }

    /// Absolute index one past the last datapoint (`start_index + len`).
    pub fn end_index(&self) -> i64 {
        self.start_index + self.data.len() as i64
    }

    pub(crate) fn key(&self) -> BatchKey {
        BatchKey {
            coordinate: self.coordinate.clone(),
            end_index: self.end_index(),
        }
    }
}

/// Identity key of a durable batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BatchKey {
    pub coordinate: Coordinate,
    pub end_index: i64,
}
