//! Engine configuration.

use std::time::Duration;

/// Default number of batches moved to the cold tier per compaction
/// transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 16;

/// Default number of datapoints per stored chunk (the hot tier splits larger
/// inserts into batches of this size).
pub const DEFAULT_BATCH_SIZE: usize = 250;

/// Default journal size that triggers a hot-tier snapshot checkpoint (4 MB).
pub const DEFAULT_JOURNAL_CHECKPOINT_BYTES: u64 = 4 * 1024 * 1024;

/// Default idle sleep for the writer loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Sync mode for hot-tier journal durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after each journaled mutation (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

/// Configuration for a [`StreamEngine`](crate::engine::StreamEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of pending batches written to the cold tier in one
    /// compaction transaction. Default: 16.
    pub chunk_size: usize,

    /// Maximum number of datapoints per stored chunk. Inserts larger than
    /// this are split into multiple batches. Default: 250.
    pub batch_size: usize,

    /// Journal durability mode. Default: [`SyncMode::Fsync`].
    pub sync_mode: SyncMode,

    /// Journal size threshold that triggers a snapshot checkpoint.
    /// Default: 4 MB.
    pub journal_checkpoint_bytes: u64,

    /// How long the writer loop sleeps when no batches are pending.
    /// Default: 500 ms.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            sync_mode: SyncMode::default(),
            journal_checkpoint_bytes: DEFAULT_JOURNAL_CHECKPOINT_BYTES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of batches per compaction transaction.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the number of datapoints per stored chunk.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the journal sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Sets the journal checkpoint threshold in bytes.
    pub fn with_journal_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.journal_checkpoint_bytes = bytes;
        self
    }

    /// Sets the writer loop idle sleep.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
