//! Hot tier: the in-memory write cache.
//!
//! # Architecture
//!
//! Every coordinate (stream + substream) owns a `CoordCache`: the most recent
//! datapoints kept as a contiguous window `[start_index, length)` of the
//! coordinate's absolute index space, plus the length and timestamp watermark
//! needed to admit inserts without touching the cold tier. Alongside the
//! per-coordinate caches sit two queues shared by all coordinates:
//!
//! - `pending`: batches accepted by `insert` but not yet picked up by the
//!   compaction loop.
//! - `processing`: batches handed to the compactor and awaiting durable
//!   confirmation via [`HotCache::clear_batches`].
//!
//! All mutations are journaled before they touch memory (see the
//! [`journal`](self::journal) module docs), so a restart rebuilds the exact
//! cache contents, including in-flight queue entries.
//!
//! # Lock ordering
//!
//! To stay deadlock-free, locks are always taken in this order (any prefix
//! may be skipped, never reordered):
//!
//! ```text
//! coords (RwLock) → CoordCache (Mutex) → queues (Mutex) → journal (Mutex)
//! ```
//!
//! Every mutation holds its governing lock (the coordinate mutex, the queues
//! mutex, or the map write lock) across both the journal append and the
//! in-memory update, and `checkpoint` holds all of them, so a snapshot can
//! never observe a state the reset journal does not account for.

mod journal;

pub(crate) use journal::JournalOp;

use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::model::{
    put_bytes_u32, put_str_u16, Batch, BatchKey, ByteReader, Coordinate, Datapoint,
    DatapointArray,
};
use journal::Journal;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Per-coordinate cached state.
#[derive(Debug, Clone, Default)]
struct CoordCache {
    /// Absolute index of the first cached datapoint.
    start_index: i64,
    /// Total datapoints ever appended to the coordinate (the next insert
    /// index). Never decreases; trimming only advances `start_index`.
    length: i64,
    /// Timestamp of the first datapoint ever inserted.
    start_time: f64,
    /// Timestamp watermark: the largest timestamp accepted so far.
    end_time: f64,
    /// The cached window, `points[k]` holding index `start_index + k`.
    points: VecDeque<Datapoint>,
}

impl CoordCache {
    fn slice(&self, r1: i64, r2: i64) -> DatapointArray {
        let lo = (r1 - self.start_index) as usize;
        let hi = (r2 - self.start_index) as usize;
        self.points
            .iter()
            .skip(lo)
            .take(hi - lo)
            .cloned()
            .collect::<Vec<_>>()
            .into()
    }
}

#[derive(Debug, Default)]
struct BatchQueues {
    pending: VecDeque<Batch>,
    processing: Vec<Batch>,
}

/// Snapshot of hot-tier gauges, taken without blocking writers for long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotStats {
    /// Number of coordinates with cached state.
    pub coordinates: usize,
    /// Total datapoints held across all coordinate windows.
    pub cached_points: usize,
    /// Batches waiting for the compaction loop.
    pub pending_batches: usize,
    /// Batches handed to the compactor but not yet durable.
    pub processing_batches: usize,
}

/// The in-memory hot tier, journaled for crash durability.
pub struct HotCache {
    coords: RwLock<HashMap<Coordinate, Arc<Mutex<CoordCache>>>>,
    queues: Mutex<BatchQueues>,
    journal: Mutex<Journal>,
    batch_size: usize,
    checkpoint_bytes: u64,
}

impl HotCache {
    /// Opens the hot tier under `dir`, recovering any previous state from
    /// the snapshot and journal.
    pub fn open(dir: &Path, config: &EngineConfig) -> Result<HotCache> {
        let (journal, snapshot, ops) = Journal::open(dir, config.sync_mode)?;

        let mut state = match snapshot {
            Some(bytes) => HotState::decode(&bytes)?,
            None => HotState::default(),
        };
        let replayed = ops.len();
        for op in ops {
            state.apply(op);
        }
        if replayed > 0 || !state.coords.is_empty() {
            info!(
                coordinates = state.coords.len(),
                replayed_ops = replayed,
                pending = state.pending.len(),
                processing = state.processing.len(),
                "hot tier recovered"
            );
        }

        let coords = state
            .coords
            .into_iter()
            .map(|(coordinate, cache)| (coordinate, Arc::new(Mutex::new(cache))))
            .collect();
        Ok(HotCache {
            coords: RwLock::new(coords),
            queues: Mutex::new(BatchQueues {
                pending: state.pending,
                processing: state.processing,
            }),
            journal: Mutex::new(journal),
            batch_size: config.batch_size,
            checkpoint_bytes: config.journal_checkpoint_bytes,
        })
    }

    fn coord_handle(&self, coordinate: &Coordinate) -> Option<Arc<Mutex<CoordCache>>> {
        self.coords.read().get(coordinate).cloned()
    }

    fn coord_handle_or_create(&self, coordinate: &Coordinate) -> Arc<Mutex<CoordCache>> {
        if let Some(handle) = self.coord_handle(coordinate) {
            return handle;
        }
        self.coords
            .write()
            .entry(coordinate.clone())
            .or_default()
            .clone()
    }

    /// Total datapoints ever appended to a coordinate (0 if unknown here;
    /// the orchestrator seeds recovered lengths from the cold tier).
    pub fn stream_length(&self, stream: &str, substream: &str) -> i64 {
        self.coord_handle(&Coordinate::new(stream, substream))
            .map(|handle| handle.lock().length)
            .unwrap_or(0)
    }

    /// Aligns a coordinate with durable cold-tier state that is ahead of
    /// the recovered hot state (a lost or stale journal). The cached window
    /// is discarded since its indices no longer line up.
    ///
    /// Derived from the cold tier at every open, so it is deliberately not
    /// journaled.
    pub(crate) fn seed(&self, stream: &str, substream: &str, length: i64, end_time: f64) {
        let coordinate = Coordinate::new(stream, substream);
        let handle = self.coord_handle_or_create(&coordinate);
        let mut cache = handle.lock();
        if cache.length >= length {
            return;
        }
        cache.points.clear();
        cache.start_index = length;
        cache.length = length;
        cache.end_time = cache.end_time.max(end_time);
    }

    /// Appends `data` to a coordinate, returning the new length.
    ///
    /// The caller guarantees `data` is non-empty and internally ordered by
    /// timestamp. With `restamp` set, datapoints at or below the coordinate
    /// watermark are raised to it (to just above it when the watermark is an
    /// exact integer); otherwise such datapoints reject the whole insert.
    ///
    /// Admission, splitting into batches, journaling and queueing happen
    /// atomically under the coordinate lock, so concurrent inserts to one
    /// coordinate serialize and observe each other's watermarks.
    pub fn insert(
        &self,
        stream: &str,
        substream: &str,
        data: DatapointArray,
        restamp: bool,
    ) -> Result<i64> {
        if data.is_empty() {
            return Err(StoreError::EmptyInsert);
        }
        let coordinate = Coordinate::new(stream, substream);
        // The map read lock is held for the whole mutation so a concurrent
        // delete cannot orphan the coordinate between the journal append
        // and the memory update. Creation races retry.
        let (_coords, handle) = loop {
            let coords = self.coords.read();
            if let Some(handle) = coords.get(&coordinate) {
                let handle = handle.clone();
                break (coords, handle);
            }
            drop(coords);
            self.coords
                .write()
                .entry(coordinate.clone())
                .or_default();
        };
        let mut cache = handle.lock();

        let watermark = cache.end_time;
        let mut data = data;
        let first = data.start_time().unwrap_or(watermark);
        if first <= watermark {
            if !restamp {
                return Err(StoreError::OrderingViolation {
                    stream: coordinate.stream.clone(),
                    substream: coordinate.substream.clone(),
                    timestamp: first,
                    watermark,
                });
            }
            // Raise the stale prefix to the watermark. An exact-integer
            // watermark gets the next representable value so the restamped
            // points land strictly past an already-closed integer boundary.
            let target = if watermark == watermark.trunc() {
                watermark.next_up()
            } else {
                watermark
            };
            for point in data.as_mut_slice().iter_mut().rev() {
                if point.t <= watermark {
                    point.t = target;
                }
            }
        }

        let mut next = cache.length;
        let mut batches = Vec::new();
        for part in data.split(self.batch_size) {
            let batch = Batch::new(coordinate.clone(), next, part);
            next = batch.end_index();
            batches.push(batch);
        }
        let ops: Vec<JournalOp> = batches.iter().cloned().map(JournalOp::Insert).collect();

        let mut queues = self.queues.lock();
        self.journal.lock().append_all(&ops)?;

        if cache.length == 0 {
            cache.start_time = batches[0].data.start_time().unwrap_or(0.0);
        }
        for batch in &batches {
            for point in batch.data.iter() {
                cache.points.push_back(point.clone());
            }
        }
        cache.length = next;
        if let Some(end) = batches.last().and_then(|b| b.data.end_time()) {
            cache.end_time = cache.end_time.max(end);
        }
        queues.pending.extend(batches);
        Ok(cache.length)
    }

    /// Reads `[i1, i2)` from the cached window, resolving negative and
    /// end-relative indices against the coordinate length.
    ///
    /// Returns the resolved `(r1, r2)` along with the data when the range
    /// is fully cached, or `None` when part of it has been trimmed and the
    /// cold tier must serve it.
    pub fn read_range(
        &self,
        stream: &str,
        substream: &str,
        i1: i64,
        i2: i64,
    ) -> (Option<DatapointArray>, i64, i64) {
        let Some(handle) = self.coord_handle(&Coordinate::new(stream, substream)) else {
            let (r1, r2) = resolve_range(0, i1, i2);
            return (Some(DatapointArray::new()), r1, r2);
        };
        let cache = handle.lock();
        let (r1, r2) = resolve_range(cache.length, i1, i2);
        if r1 >= r2 {
            return (Some(DatapointArray::new()), r1, r2);
        }
        if r1 >= cache.start_index {
            return (Some(cache.slice(r1, r2)), r1, r2);
        }
        (None, r1, r2)
    }

    /// Smallest cached absolute index whose timestamp is `>= t`, or the
    /// coordinate length when every cached point is older. `None` when the
    /// coordinate has no cached state at all.
    pub(crate) fn time_index(&self, stream: &str, substream: &str, t: f64) -> Option<i64> {
        let handle = self.coord_handle(&Coordinate::new(stream, substream))?;
        let cache = handle.lock();
        let pos = cache.points.partition_point(|p| p.t < t) as i64;
        Some(cache.start_index + pos)
    }

    /// Discards cached datapoints below index `up_to` for a coordinate.
    /// Length and watermark are unaffected.
    pub fn trim(&self, stream: &str, substream: &str, up_to: i64) -> Result<()> {
        let coordinate = Coordinate::new(stream, substream);
        let Some(handle) = self.coord_handle(&coordinate) else {
            return Ok(());
        };
        let mut cache = handle.lock();
        let up_to = up_to.min(cache.length);
        if up_to <= cache.start_index {
            return Ok(());
        }
        self.journal
            .lock()
            .append(&JournalOp::Trim { coordinate, up_to })?;
        while cache.start_index < up_to {
            cache.points.pop_front();
            cache.start_index += 1;
        }
        Ok(())
    }

    /// Moves up to `max` pending batches to the processing queue and returns
    /// them, oldest first. Batches stay in processing until
    /// [`clear_batches`](Self::clear_batches) confirms durability.
    pub fn read_batches(&self, max: usize) -> Result<Vec<Batch>> {
        let mut queues = self.queues.lock();
        let count = max.min(queues.pending.len());
        if count == 0 {
            return Ok(Vec::new());
        }
        self.journal.lock().append(&JournalOp::Dequeue { count })?;
        let moved: Vec<Batch> = queues.pending.drain(..count).collect();
        queues.processing.extend(moved.iter().cloned());
        Ok(moved)
    }

    /// The batches currently awaiting durable confirmation. Non-empty at
    /// startup means a previous run crashed mid-compaction.
    pub fn read_processing_queue(&self) -> Vec<Batch> {
        self.queues.lock().processing.clone()
    }

    /// Removes durably persisted batches from the processing queue.
    pub fn clear_batches(&self, batches: &[Batch]) -> Result<()> {
        if batches.is_empty() {
            return Ok(());
        }
        let keys: Vec<BatchKey> = batches.iter().map(Batch::key).collect();
        let mut queues = self.queues.lock();
        self.journal
            .lock()
            .append(&JournalOp::Clear { keys: keys.clone() })?;
        let keys: HashSet<BatchKey> = keys.into_iter().collect();
        queues.processing.retain(|b| !keys.contains(&b.key()));
        Ok(())
    }

    /// Removes a coordinate and any of its queued batches.
    pub fn delete_substream(&self, stream: &str, substream: &str) -> Result<()> {
        let coordinate = Coordinate::new(stream, substream);
        let mut coords = self.coords.write();
        let mut queues = self.queues.lock();
        self.journal.lock().append(&JournalOp::DeleteSubstream {
            coordinate: coordinate.clone(),
        })?;
        coords.remove(&coordinate);
        queues.pending.retain(|b| b.coordinate != coordinate);
        queues.processing.retain(|b| b.coordinate != coordinate);
        Ok(())
    }

    /// Removes every substream of a stream and any of their queued batches.
    pub fn delete_stream(&self, stream: &str) -> Result<()> {
        let mut coords = self.coords.write();
        let mut queues = self.queues.lock();
        self.journal.lock().append(&JournalOp::DeleteStream {
            stream: stream.to_string(),
        })?;
        coords.retain(|coordinate, _| coordinate.stream != stream);
        queues.pending.retain(|b| b.coordinate.stream != stream);
        queues.processing.retain(|b| b.coordinate.stream != stream);
        Ok(())
    }

    /// Writes a snapshot and resets the journal when the journal has grown
    /// past the configured threshold. Returns whether a checkpoint ran.
    pub fn maybe_checkpoint(&self) -> Result<bool> {
        if self.journal.lock().bytes() < self.checkpoint_bytes {
            return Ok(false);
        }
        self.checkpoint()?;
        Ok(true)
    }

    /// Unconditionally snapshots the full hot state and resets the journal.
    ///
    /// Holds the coordinate map write lock, every coordinate lock and the
    /// queues lock for the duration, so the snapshot is a consistent cut.
    pub fn checkpoint(&self) -> Result<()> {
        let coords = self.coords.write();
        let handles: Vec<(Coordinate, Arc<Mutex<CoordCache>>)> = coords
            .iter()
            .map(|(coordinate, handle)| (coordinate.clone(), handle.clone()))
            .collect();
        let guards: Vec<(&Coordinate, parking_lot::MutexGuard<'_, CoordCache>)> = handles
            .iter()
            .map(|(coordinate, handle)| (coordinate, handle.lock()))
            .collect();
        let queues = self.queues.lock();

        let mut state = HotState::default();
        for (coordinate, guard) in &guards {
            state.coords.insert((*coordinate).clone(), (**guard).clone());
        }
        state.pending = queues.pending.clone();
        state.processing = queues.processing.clone();

        let payload = state.encode()?;
        self.journal.lock().checkpoint(&payload)
    }

    /// Current hot-tier gauges.
    pub fn stats(&self) -> HotStats {
        let coords = self.coords.read();
        let coordinates = coords.len();
        let cached_points = coords
            .values()
            .map(|handle| handle.lock().points.len())
            .sum();
        let queues = self.queues.lock();
        HotStats {
            coordinates,
            cached_points,
            pending_batches: queues.pending.len(),
            processing_batches: queues.processing.len(),
        }
    }
}

/// Resolves user-facing `[i1, i2)` against a coordinate length `n`:
/// negative `i1` counts from the end, `i2 <= 0` counts from the end (so 0
/// means "through the end"), and both are clamped to `[0, n]` with
/// `r1 <= r2`.
pub(crate) fn resolve_range(n: i64, i1: i64, i2: i64) -> (i64, i64) {
    let r1 = if i1 < 0 { (n + i1).max(0) } else { i1.min(n) };
    let mut r2 = if i2 <= 0 { (n + i2).max(0) } else { i2.min(n) };
    if r2 < r1 {
        r2 = r1;
    }
    (r1, r2)
}

/// Plain (unlocked) hot state, used for recovery replay and snapshots.
#[derive(Debug, Default)]
struct HotState {
    coords: HashMap<Coordinate, CoordCache>,
    pending: VecDeque<Batch>,
    processing: Vec<Batch>,
}

impl HotState {
    fn apply(&mut self, op: JournalOp) {
        match op {
            JournalOp::Insert(batch) => {
                let cache = self.coords.entry(batch.coordinate.clone()).or_default();
                if cache.length == 0 && cache.points.is_empty() {
                    cache.start_index = batch.start_index;
                    cache.start_time = batch.data.start_time().unwrap_or(0.0);
                }
                for point in batch.data.iter() {
                    cache.points.push_back(point.clone());
                }
                cache.length = batch.end_index();
                if let Some(end) = batch.data.end_time() {
                    cache.end_time = cache.end_time.max(end);
                }
                self.pending.push_back(batch);
            }
            JournalOp::Dequeue { count } => {
                let count = count.min(self.pending.len());
                let moved: Vec<Batch> = self.pending.drain(..count).collect();
                self.processing.extend(moved);
            }
            JournalOp::Clear { keys } => {
                let keys: HashSet<BatchKey> = keys.into_iter().collect();
                self.processing.retain(|b| !keys.contains(&b.key()));
            }
            JournalOp::Trim { coordinate, up_to } => {
                if let Some(cache) = self.coords.get_mut(&coordinate) {
                    while cache.start_index < up_to && !cache.points.is_empty() {
                        cache.points.pop_front();
                        cache.start_index += 1;
                    }
                }
            }
            JournalOp::DeleteStream { stream } => {
                self.coords.retain(|coordinate, _| coordinate.stream != stream);
                self.pending.retain(|b| b.coordinate.stream != stream);
                self.processing.retain(|b| b.coordinate.stream != stream);
            }
            JournalOp::DeleteSubstream { coordinate } => {
                self.coords.remove(&coordinate);
                self.pending.retain(|b| b.coordinate != coordinate);
                self.processing.retain(|b| b.coordinate != coordinate);
            }
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.coords.len() as u32).to_le_bytes());
        for (coordinate, cache) in &self.coords {
            put_str_u16(&mut buf, &coordinate.stream);
            put_str_u16(&mut buf, &coordinate.substream);
            buf.extend_from_slice(&cache.start_index.to_le_bytes());
            buf.extend_from_slice(&cache.length.to_le_bytes());
            buf.extend_from_slice(&cache.start_time.to_le_bytes());
            buf.extend_from_slice(&cache.end_time.to_le_bytes());
            let points: DatapointArray = cache.points.iter().cloned().collect::<Vec<_>>().into();
            put_bytes_u32(&mut buf, &points.encode()?);
        }
        put_batches(&mut buf, self.pending.iter())?;
        put_batches(&mut buf, self.processing.iter())?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> Result<HotState> {
        let mut reader = ByteReader::new(bytes);
        let mut state = HotState::default();

        let coord_count = reader.u32()? as usize;
        for _ in 0..coord_count {
            let stream = reader.str_u16()?;
            let substream = reader.str_u16()?;
            let start_index = reader.i64()?;
            let length = reader.i64()?;
            let start_time = reader.f64()?;
            let end_time = reader.f64()?;
            let points = DatapointArray::decode(reader.bytes_u32()?)?;
            state.coords.insert(
                Coordinate::new(stream, substream),
                CoordCache {
                    start_index,
                    length,
                    start_time,
                    end_time,
                    points: points.as_slice().iter().cloned().collect(),
                },
            );
        }
        state.pending = read_batches_from(&mut reader)?.into();
        state.processing = read_batches_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(StoreError::Decode(format!(
                "{} trailing bytes after snapshot state",
                reader.remaining()
            )));
        }
        Ok(state)
    }
}

fn put_batches<'a>(buf: &mut Vec<u8>, batches: impl ExactSizeIterator<Item = &'a Batch>) -> Result<()> {
    buf.extend_from_slice(&(batches.len() as u32).to_le_bytes());
    for batch in batches {
        put_str_u16(buf, &batch.coordinate.stream);
        put_str_u16(buf, &batch.coordinate.substream);
        buf.extend_from_slice(&batch.start_index.to_le_bytes());
        put_bytes_u32(buf, &batch.data.encode()?);
    }
    Ok(())
}

fn read_batches_from(reader: &mut ByteReader<'_>) -> Result<Vec<Batch>> {
    let count = reader.u32()? as usize;
    let mut batches = Vec::with_capacity(count);
    for _ in 0..count {
        let stream = reader.str_u16()?;
        let substream = reader.str_u16()?;
        let start_index = reader.i64()?;
        let data = DatapointArray::decode(reader.bytes_u32()?)?;
        batches.push(Batch::new(
            Coordinate::new(stream, substream),
            start_index,
            data,
        ));
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn array(ts: &[f64]) -> DatapointArray {
        ts.iter()
            .map(|&t| Datapoint::new(t, json!(t)))
            .collect::<Vec<_>>()
            .into()
    }

    fn open(dir: &TempDir, batch_size: usize) -> HotCache {
        let config = EngineConfig::new().with_batch_size(batch_size);
        HotCache::open(dir.path(), &config).unwrap()
    }

    fn times(data: &DatapointArray) -> Vec<f64> {
        data.iter().map(|p| p.t).collect()
    }

    #[test]
    fn test_insert_and_read_range() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        assert_eq!(hot.insert("s", "", array(&[1.0, 2.0, 3.0]), false).unwrap(), 3);
        assert_eq!(hot.insert("s", "", array(&[4.0, 5.0]), false).unwrap(), 5);
        assert_eq!(hot.stream_length("s", ""), 5);

        let (data, r1, r2) = hot.read_range("s", "", 1, 4);
        assert_eq!((r1, r2), (1, 4));
        assert_eq!(times(&data.unwrap()), vec![2.0, 3.0, 4.0]);

        // negative and end-relative indices
        let (data, r1, r2) = hot.read_range("s", "", -2, 0);
        assert_eq!((r1, r2), (3, 5));
        assert_eq!(times(&data.unwrap()), vec![4.0, 5.0]);
    }

    #[test]
    fn test_insert_splits_into_batches() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 2);

        hot.insert("s", "", array(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
            .unwrap();
        let batches = hot.read_batches(10).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].start_index, 0);
        assert_eq!(batches[1].start_index, 2);
        assert_eq!(batches[2].start_index, 4);
        assert_eq!(batches[2].end_index(), 5);
    }

    #[test]
    fn test_out_of_order_insert_rejected() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        hot.insert("s", "", array(&[5.0]), false).unwrap();
        let err = hot.insert("s", "", array(&[3.0]), false).unwrap_err();
        assert!(matches!(err, StoreError::OrderingViolation { .. }));
        // a timestamp equal to the watermark is rejected too
        let err = hot.insert("s", "", array(&[5.0]), false).unwrap_err();
        assert!(matches!(err, StoreError::OrderingViolation { .. }));
        // the failed inserts left nothing behind
        assert_eq!(hot.stream_length("s", ""), 1);
    }

    #[test]
    fn test_restamp_raises_stale_timestamps() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        hot.insert("s", "", array(&[5.5]), false).unwrap();
        hot.insert("s", "", array(&[3.0, 4.0, 7.0]), true).unwrap();

        let (data, _, _) = hot.read_range("s", "", 0, 0);
        assert_eq!(times(&data.unwrap()), vec![5.5, 5.5, 5.5, 7.0]);
    }

    #[test]
    fn test_restamp_above_integer_watermark() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        hot.insert("s", "", array(&[5.0]), false).unwrap();
        hot.insert("s", "", array(&[2.0]), true).unwrap();

        let (data, _, _) = hot.read_range("s", "", 1, 2);
        let restamped = data.unwrap().as_slice()[0].t;
        assert!(restamped > 5.0);
        assert_eq!(restamped, 5.0_f64.next_up());
    }

    #[test]
    fn test_empty_insert_rejected() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);
        assert!(matches!(
            hot.insert("s", "", DatapointArray::new(), false),
            Err(StoreError::EmptyInsert)
        ));
    }

    #[test]
    fn test_trim_advances_window_not_length() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        hot.insert("s", "", array(&[1.0, 2.0, 3.0, 4.0]), false).unwrap();
        hot.trim("s", "", 2).unwrap();

        assert_eq!(hot.stream_length("s", ""), 4);
        let (data, _, _) = hot.read_range("s", "", 2, 4);
        assert_eq!(times(&data.unwrap()), vec![3.0, 4.0]);
        // trimmed prefix is no longer served here
        let (data, r1, r2) = hot.read_range("s", "", 0, 4);
        assert!(data.is_none());
        assert_eq!((r1, r2), (0, 4));
    }

    #[test]
    fn test_queue_lifecycle() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 2);

        hot.insert("s", "", array(&[1.0, 2.0, 3.0, 4.0]), false).unwrap();
        assert_eq!(hot.stats().pending_batches, 2);

        let taken = hot.read_batches(1).unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(hot.stats().pending_batches, 1);
        assert_eq!(hot.read_processing_queue(), taken);

        hot.clear_batches(&taken).unwrap();
        assert!(hot.read_processing_queue().is_empty());
    }

    #[test]
    fn test_recovery_replays_journal() {
        let dir = TempDir::new().unwrap();
        {
            let hot = open(&dir, 2);
            hot.insert("s", "", array(&[1.0, 2.0, 3.0]), false).unwrap();
            let taken = hot.read_batches(1).unwrap();
            assert_eq!(taken.len(), 1);
        }

        let hot = open(&dir, 2);
        assert_eq!(hot.stream_length("s", ""), 3);
        let (data, _, _) = hot.read_range("s", "", 0, 0);
        assert_eq!(times(&data.unwrap()), vec![1.0, 2.0, 3.0]);
        // the dequeued batch is back in processing, awaiting the compactor
        let stats = hot.stats();
        assert_eq!(stats.pending_batches, 1);
        assert_eq!(stats.processing_batches, 1);
    }

    #[test]
    fn test_oversized_stream_name_rejected_without_state_change() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        let stream = "s".repeat(u16::MAX as usize + 1);
        let err = hot.insert(&stream, "", array(&[1.0]), false).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert_eq!(hot.stream_length(&stream, ""), 0);
        assert_eq!(hot.stats().pending_batches, 0);
    }

    #[test]
    fn test_recovery_after_torn_tail_keeps_later_inserts() {
        let dir = TempDir::new().unwrap();
        {
            let hot = open(&dir, 250);
            hot.insert("s", "", array(&[1.0]), false).unwrap();
            hot.insert("s", "", array(&[2.0]), false).unwrap();
        }

        // Crash mid-append: the last frame is torn.
        let path = dir.path().join("hot.journal");
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        {
            let hot = open(&dir, 250);
            assert_eq!(hot.stream_length("s", ""), 1);
            // Inserts acknowledged after the recovery must survive the next
            // clean restart.
            hot.insert("s", "", array(&[3.0, 4.0]), false).unwrap();
        }

        let hot = open(&dir, 250);
        assert_eq!(hot.stream_length("s", ""), 3);
        let (data, _, _) = hot.read_range("s", "", 0, 0);
        assert_eq!(times(&data.unwrap()), vec![1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_recovery_after_checkpoint() {
        let dir = TempDir::new().unwrap();
        {
            let hot = open(&dir, 250);
            hot.insert("s", "sub", array(&[1.0, 2.0]), false).unwrap();
            hot.checkpoint().unwrap();
            hot.insert("s", "sub", array(&[3.0]), false).unwrap();
        }

        let hot = open(&dir, 250);
        assert_eq!(hot.stream_length("s", "sub"), 3);
        let (data, _, _) = hot.read_range("s", "sub", 0, 0);
        assert_eq!(times(&data.unwrap()), vec![1.0, 2.0, 3.0]);
        assert_eq!(hot.stats().pending_batches, 2);
    }

    #[test]
    fn test_delete_purges_queues() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        hot.insert("s", "", array(&[1.0]), false).unwrap();
        hot.insert("s", "downsampled", array(&[1.0]), false).unwrap();
        hot.insert("other", "", array(&[1.0]), false).unwrap();

        hot.delete_substream("s", "downsampled").unwrap();
        assert_eq!(hot.stream_length("s", "downsampled"), 0);
        assert_eq!(hot.stream_length("s", ""), 1);
        assert_eq!(hot.stats().pending_batches, 2);

        hot.delete_stream("s").unwrap();
        assert_eq!(hot.stream_length("s", ""), 0);
        assert_eq!(hot.stats().pending_batches, 1);
        assert_eq!(hot.stream_length("other", ""), 1);
    }

    #[test]
    fn test_time_index_scans_cached_window() {
        let dir = TempDir::new().unwrap();
        let hot = open(&dir, 250);

        hot.insert("s", "", array(&[1.0, 2.0, 3.0, 4.0]), false).unwrap();
        assert_eq!(hot.time_index("s", "", 2.5), Some(2));
        assert_eq!(hot.time_index("s", "", 2.0), Some(1));
        assert_eq!(hot.time_index("s", "", 0.5), Some(0));
        assert_eq!(hot.time_index("s", "", 9.0), Some(4));
        assert_eq!(hot.time_index("missing", "", 1.0), None);
    }

    #[test]
    fn test_resolve_range_clamps() {
        assert_eq!(resolve_range(10, 0, 0), (0, 10));
        assert_eq!(resolve_range(10, 2, 5), (2, 5));
        assert_eq!(resolve_range(10, -3, 0), (7, 10));
        assert_eq!(resolve_range(10, 0, -2), (0, 8));
        assert_eq!(resolve_range(10, 5, 3), (5, 5));
        assert_eq!(resolve_range(10, -20, 40), (0, 10));
        assert_eq!(resolve_range(0, -5, 0), (0, 0));
    }
}
