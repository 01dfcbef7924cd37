//! Rill - a two-tier storage engine for append-only time-series streams
//!
//! This crate provides durable, multi-tenant storage for append-only
//! sensor/event streams, each stream optionally split into named substreams.
//! Writes land in a low-latency in-memory hot cache and are compacted into a
//! durable SQLite cold store by a write-behind loop; queries by index or by
//! time window are answered by composable iterators that transparently span
//! both tiers.
//!
//! # Components
//!
//! - [`StreamEngine`]: the orchestrator - inserts, the compaction loop, and
//!   cross-tier range queries
//! - [`HotCache`]: journaled in-memory append cache with atomic
//!   insert-with-restamp
//! - [`ColdStore`]: durable chunk rows in SQLite, keyed by coordinate and
//!   end index
//! - [`DataRange`]: the lazy, closeable iterator contract every query
//!   returns
//!
//! # Example
//!
//! ```rust,ignore
//! use rill::{EngineConfig, StreamEngine};
//!
//! let engine = StreamEngine::open("/var/lib/rill", EngineConfig::new())?;
//!
//! // Append timestamp-ordered datapoints
//! engine.insert("sensor1", "", points, false)?;
//!
//! // Run one compaction round (or spawn run_writer on a thread)
//! engine.write_queue()?;
//! engine.write_chunk()?;
//!
//! // Query across both tiers
//! let mut range = engine.index_range("sensor1", "", -10, 0)?;
//! while let Some(point) = range.next()? {
//!     println!("{} {}", point.t, point.data);
//! }
//! ```

#![deny(missing_docs)]

pub mod cold;
pub mod config;
pub mod engine;
pub mod error;
pub mod hot;
pub mod model;
pub mod range;

pub use cold::{ColdStats, ColdStore};
pub use config::{EngineConfig, SyncMode};
pub use engine::{EngineStats, StreamEngine};
pub use error::{Result, StoreError};
pub use hot::{HotCache, HotStats};
pub use model::{Batch, Coordinate, Datapoint, DatapointArray};
pub use range::{ArrayRange, BoxedRange, DataRange, EmptyRange, NumRange, TimedRange};
