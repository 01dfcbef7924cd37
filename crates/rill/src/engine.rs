//! The storage engine orchestrator.
//!
//! # Architecture
//!
//! [`StreamEngine`] is the single entry point combining the hot and cold
//! tiers. Writes go to the hot tier synchronously; the write-behind
//! compaction loop ([`write_queue`](StreamEngine::write_queue) /
//! [`write_chunk`](StreamEngine::write_chunk), or the blocking
//! [`run_writer`](StreamEngine::run_writer)) moves accepted batches into the
//! cold tier transactionally and trims the hot cache behind them. Reads are
//! answered by composing range iterators from whichever tiers hold the
//! requested window; a single range may cross the cold/hot boundary
//! mid-iteration.
//!
//! The engine is cheap to clone and shares its tiers, so the compaction
//! loop can run on its own thread while request handlers insert and query.

use crate::cold::{ColdStats, ColdStore};
use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::hot::{HotCache, HotStats};
use crate::model::{Batch, Coordinate, DatapointArray};
use crate::range::{
    ArrayRange, BoxedRange, DataRange, EmptyRange, LiveRange, NumRange, TimedRange,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

/// Point-in-time gauges across both tiers.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    /// Hot-tier gauges.
    pub hot: HotStats,
    /// Cold-tier gauges.
    pub cold: ColdStats,
}

/// The two-tier storage engine.
///
/// All methods take `&self`; per-coordinate insert atomicity and compaction
/// coordination are handled inside the tiers. Clones share state.
#[derive(Clone)]
pub struct StreamEngine {
    hot: Arc<HotCache>,
    cold: ColdStore,
    config: EngineConfig,
}

impl StreamEngine {
    /// Opens the engine under `dir`, recovering hot-tier state from its
    /// journal and creating the cold-tier schema if needed.
    ///
    /// Coordinates whose durable end lies past the recovered hot state (a
    /// lost journal) are re-seeded from the cold tier so the index space
    /// stays consistent.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<StreamEngine> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let cold = ColdStore::open(&dir.join("cold.db"))?;
        let hot = Arc::new(HotCache::open(&dir.join("hot"), &config)?);
        for (coordinate, end_index, end_time) in cold.coordinates()? {
            hot.seed(&coordinate.stream, &coordinate.substream, end_index, end_time);
        }
        info!(dir = %dir.display(), "storage engine open");
        Ok(StreamEngine { hot, cold, config })
    }

    /// Total datapoints ever appended to a coordinate. 0 for a coordinate
    /// that was never written.
    pub fn stream_length(&self, stream: &str, substream: &str) -> Result<i64> {
        let length = self.hot.stream_length(stream, substream);
        if length > 0 {
            return Ok(length);
        }
        Ok(self.cold.durable_end(stream, substream)?.0)
    }

    /// Appends `data` to a coordinate, returning the new length.
    ///
    /// The batch must be non-empty and internally timestamp-ordered; both
    /// are rejected before any tier is touched. Datapoints at or below the
    /// coordinate's watermark reject the insert unless `restamp` is set,
    /// in which case they are raised to the watermark (see
    /// [`HotCache::insert`]).
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
        if !data.is_timestamp_ordered() {
            return Err(StoreError::UnorderedBatch);
        }
        self.hot.insert(stream, substream, data, restamp)
    }

    /// Flushes batches left in the processing queue by a previous run.
    ///
    /// Call once at startup, before the first [`write_chunk`](Self::write_chunk).
    /// Re-delivery of batches that already landed before the crash is
    /// idempotent.
    pub fn write_queue(&self) -> Result<()> {
        let batches = self.hot.read_processing_queue();
        if batches.is_empty() {
            return Ok(());
        }
        info!(
            batches = batches.len(),
            "flushing processing queue from previous run"
        );
        self.persist(&batches)
    }

    /// Runs one compaction round: moves up to `chunk_size` pending batches
    /// into the cold tier in one transaction, clears them from the
    /// processing queue and trims the hot cache behind them. Returns the
    /// number of batches persisted.
    pub fn write_chunk(&self) -> Result<usize> {
        let batches = self.hot.read_batches(self.config.chunk_size)?;
        if batches.is_empty() {
            return Ok(0);
        }
        self.persist(&batches)?;
        self.hot.maybe_checkpoint()?;
        Ok(batches.len())
    }

    fn persist(&self, batches: &[Batch]) -> Result<()> {
        self.cold.write_batches(batches)?;
        self.hot.clear_batches(batches)?;
        // Trimming only after the durable commit: a crash in between leaves
        // the batches in the processing queue for the next write_queue.
        let mut ends: HashMap<&Coordinate, i64> = HashMap::new();
        for batch in batches {
            let end = ends.entry(&batch.coordinate).or_insert(0);
            *end = (*end).max(batch.end_index());
        }
        for (coordinate, end) in ends {
            self.hot.trim(&coordinate.stream, &coordinate.substream, end)?;
        }
        debug!(batches = batches.len(), "compacted batches");
        Ok(())
    }

    /// The blocking compaction loop: one [`write_queue`](Self::write_queue),
    /// then [`write_chunk`](Self::write_chunk) until `stop` is raised,
    /// sleeping `poll_interval` when idle.
    ///
    /// A persistent failure halts the loop with an `error!` instead of
    /// retrying forever into the same failure; the error is also returned.
    pub fn run_writer(&self, stop: &AtomicBool) -> Result<()> {
        if let Err(e) = self.write_queue() {
            error!(error = %e, "startup queue flush failed, compaction loop halting");
            return Err(e);
        }
        while !stop.load(Ordering::Relaxed) {
            match self.write_chunk() {
                Ok(0) => thread::sleep(self.config.poll_interval),
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "compaction loop halting");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Iterates `[i1, i2)` of a coordinate. Negative indices count from the
    /// end and `i2 = 0` means "through the end", both resolved against the
    /// length at call time.
    ///
    /// A window fully inside the hot cache is served from memory; anything
    /// older starts at the cold tier behind a tier-bridging iterator, so
    /// the result is the same sequence regardless of where compaction
    /// stands.
    pub fn index_range(
        &self,
        stream: &str,
        substream: &str,
        i1: i64,
        i2: i64,
    ) -> Result<BoxedRange> {
        let (data, r1, r2) = self.hot.read_range(stream, substream, i1, i2);
        match data {
            Some(data) if data.is_empty() => Ok(Box::new(EmptyRange)),
            Some(data) => Ok(Box::new(ArrayRange::new(data))),
            None => {
                let live = LiveRange::new(
                    self.hot.clone(),
                    self.cold.clone(),
                    Coordinate::new(stream, substream),
                    r1,
                );
                Ok(Box::new(NumRange::new(Box::new(live), r2 - r1)))
            }
        }
    }

    /// Iterates the time window `(t1, t2]` of a coordinate (`t2 <= 0`
    /// means unbounded above). An empty or never-written coordinate yields
    /// the empty range.
    pub fn time_range(
        &self,
        stream: &str,
        substream: &str,
        t1: f64,
        t2: f64,
    ) -> Result<BoxedRange> {
        if self.stream_length(stream, substream)? == 0 {
            return Ok(Box::new(EmptyRange));
        }
        let start = self.time_index(stream, substream, t1)?;
        let live = LiveRange::new(
            self.hot.clone(),
            self.cold.clone(),
            Coordinate::new(stream, substream),
            start,
        );
        Ok(Box::new(TimedRange::new(Box::new(live), t1, t2)))
    }

    /// A [`time_range`](Self::time_range) shifted by `shift` datapoints.
    ///
    /// Small positive shifts step the opened time range; anything larger
    /// than one batch, and any negative shift, reopens an index range at
    /// the computed absolute position (clamped to 0) instead of paying
    /// O(shift) iteration. The `t2` upper bound applies either way.
    pub fn time_plus_index_range(
        &self,
        stream: &str,
        substream: &str,
        t1: f64,
        t2: f64,
        shift: i64,
    ) -> Result<BoxedRange> {
        if shift == 0 {
            return self.time_range(stream, substream, t1, t2);
        }
        if shift > 0 && shift <= self.config.batch_size as i64 {
            let mut range = self.time_range(stream, substream, t1, t2)?;
            for _ in 0..shift {
                if range.next()?.is_none() {
                    break;
                }
            }
            return Ok(range);
        }
        let start = (self.time_index(stream, substream, t1)? + shift).max(0);
        let live = LiveRange::new(
            self.hot.clone(),
            self.cold.clone(),
            Coordinate::new(stream, substream),
            start,
        );
        Ok(Box::new(TimedRange::new(
            Box::new(live),
            f64::NEG_INFINITY,
            t2,
        )))
    }

    /// The absolute index of the first datapoint with timestamp `>= t`, or
    /// the coordinate length when every datapoint is older.
    pub fn time_index(&self, stream: &str, substream: &str, t: f64) -> Result<i64> {
        let coordinate = Coordinate::new(stream, substream);
        if let Some(index) = self.cold.time_index(&coordinate, t)? {
            return Ok(index);
        }
        // Every durable datapoint is older than t, so the boundary sits in
        // the hot tier's cached window (or at the length itself).
        Ok(self.hot.time_index(stream, substream, t).unwrap_or(0))
    }

    /// Removes a stream and every substream under it, from both tiers.
    ///
    /// The two tiers are not deleted atomically; the hot tier goes first on
    /// purpose. A crash between the two resurrects the coordinate at the
    /// next open (seeding restores it from the intact cold data) as if the
    /// delete had never run, and the caller can simply retry. Deleting cold
    /// first would instead leave surviving hot batches to compact into an
    /// emptied store, producing chunks with a missing index prefix.
    pub fn delete_stream(&self, stream: &str) -> Result<()> {
        self.hot.delete_stream(stream)?;
        self.cold.delete_stream(stream)
    }

    /// Removes a single coordinate from both tiers. The parent stream's
    /// other substreams are unaffected.
    ///
    /// Hot tier first, for the same crash-ordering reason as
    /// [`delete_stream`](Self::delete_stream).
    pub fn delete_substream(&self, stream: &str, substream: &str) -> Result<()> {
        self.hot.delete_substream(stream, substream)?;
        self.cold.delete_substream(stream, substream)
    }

    /// Current gauges across both tiers.
    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            hot: self.hot.stats(),
            cold: self.cold.stats()?,
        })
    }

    /// Checkpoints the hot tier so the next open replays an empty journal.
    /// The engine remains usable afterwards.
    pub fn close(&self) -> Result<()> {
        self.hot.checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Datapoint;
    use serde_json::json;
    use tempfile::TempDir;

    fn array(ts: &[f64]) -> DatapointArray {
        ts.iter()
            .map(|&t| Datapoint::new(t, json!(t)))
            .collect::<Vec<_>>()
            .into()
    }

    fn open(dir: &TempDir) -> StreamEngine {
        let config = EngineConfig::new().with_batch_size(4).with_chunk_size(2);
        StreamEngine::open(dir.path(), config).unwrap()
    }

    fn drain(range: &mut dyn DataRange) -> Vec<f64> {
        let mut out = Vec::new();
        while let Some(point) = range.next().unwrap() {
            out.push(point.t);
        }
        out
    }

    #[test]
    fn test_unordered_batch_rejected_up_front() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        let err = engine
            .insert("s", "", array(&[2.0, 1.0]), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnorderedBatch));
        assert_eq!(engine.stream_length("s", "").unwrap(), 0);
    }

    #[test]
    fn test_write_chunk_moves_batches_and_trims() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        engine
            .insert("s", "", array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), false)
            .unwrap();
        // batch_size 4 split the insert into 2 batches; chunk_size 2 takes both
        assert_eq!(engine.write_chunk().unwrap(), 2);
        assert_eq!(engine.write_chunk().unwrap(), 0);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.cold.chunks, 2);
        assert_eq!(stats.hot.pending_batches, 0);
        assert_eq!(stats.hot.processing_batches, 0);
        assert_eq!(stats.hot.cached_points, 0);
        assert_eq!(engine.stream_length("s", "").unwrap(), 6);
    }

    #[test]
    fn test_index_range_spans_tiers() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        engine
            .insert("s", "", array(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
            .unwrap();
        engine.write_chunk().unwrap();
        engine.insert("s", "", array(&[6.0, 7.0]), false).unwrap();

        let mut range = engine.index_range("s", "", 2, 0).unwrap();
        assert_eq!(drain(range.as_mut()), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_time_plus_index_range_steps_forward() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine
            .insert("s", "", array(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
            .unwrap();

        let mut range = engine
            .time_plus_index_range("s", "", 1.0, 0.0, 2)
            .unwrap();
        assert_eq!(drain(range.as_mut()), vec![4.0, 5.0]);
    }

    #[test]
    fn test_time_plus_index_range_negative_shift_reopens() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine
            .insert("s", "", array(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
            .unwrap();

        // shift of -2 from the index of t=4.0 lands at index 1
        let mut range = engine
            .time_plus_index_range("s", "", 4.0, 0.0, -2)
            .unwrap();
        assert_eq!(drain(range.as_mut()), vec![2.0, 3.0, 4.0, 5.0]);

        // a large negative shift clamps to index 0
        let mut range = engine
            .time_plus_index_range("s", "", 4.0, 0.0, -100)
            .unwrap();
        assert_eq!(drain(range.as_mut()), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_reopen_after_lost_hot_state_keeps_index_space() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open(&dir);
            engine.insert("s", "", array(&[1.0, 2.0]), false).unwrap();
            engine.write_chunk().unwrap();
        }
        // wipe the hot tier, keep the cold database
        std::fs::remove_dir_all(dir.path().join("hot")).unwrap();

        let engine = open(&dir);
        assert_eq!(engine.stream_length("s", "").unwrap(), 2);
        assert_eq!(engine.insert("s", "", array(&[3.0]), false).unwrap(), 3);
        let mut range = engine.index_range("s", "", 0, 0).unwrap();
        assert_eq!(drain(range.as_mut()), vec![1.0, 2.0, 3.0]);
    }
}
