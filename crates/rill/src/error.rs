//! Error and Result types for the rill storage engine.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for rill operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for storage engine operations.
///
/// The variants fall into four groups with different caller obligations:
///
/// - [`OrderingViolation`](StoreError::OrderingViolation) and
///   [`UnorderedBatch`](StoreError::UnorderedBatch): the insert was rejected
///   and no state changed.
/// - [`Io`](StoreError::Io) / [`Sql`](StoreError::Sql): tier connectivity or
///   transaction failure; nothing was partially committed and the operation
///   may be retried.
/// - [`Corruption`](StoreError::Corruption) /
///   [`UnsupportedVersion`](StoreError::UnsupportedVersion) /
///   [`Conflict`](StoreError::Conflict): stored data is damaged or
///   inconsistent; retrying will not help.
/// - Reading a coordinate that was never written is **not** an error: it
///   yields length 0 and empty ranges.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A batch's minimum timestamp does not advance past the coordinate's
    /// watermark and no restamp was requested.
    #[error(
        "ordering violation on {stream}/{substream}: batch min timestamp {timestamp} <= watermark {watermark}"
    )]
    OrderingViolation {
        /// Stream identifier.
        stream: String,
        /// Substream name (empty for the primary channel).
        substream: String,
        /// Minimum timestamp of the rejected batch.
        timestamp: f64,
        /// Current end-time watermark of the coordinate.
        watermark: f64,
    },

    /// The incoming datapoint batch is not internally timestamp-ordered.
    #[error("datapoint batch is not timestamp-ordered")]
    UnorderedBatch,

    /// An insert was attempted with an empty datapoint batch.
    #[error("cannot insert an empty datapoint batch")]
    EmptyInsert,

    /// A stored chunk is inconsistent with its surroundings (length does not
    /// match its index span, undecodable payload, index gap). Fatal for the
    /// read; distinct from I/O errors so operators can tell "retry me" from
    /// "investigate data damage".
    #[error("corrupt chunk for {stream}/{substream} at end index {end_index}: {reason}")]
    Corruption {
        /// Stream identifier.
        stream: String,
        /// Substream name.
        substream: String,
        /// End index of the damaged chunk.
        end_index: i64,
        /// Human-readable description of the inconsistency.
        reason: String,
    },

    /// A batch write collided with an existing chunk at the same
    /// `(stream, substream, end_index)` key but with a different payload.
    #[error("conflicting batch for {stream}/{substream} at end index {end_index}")]
    Conflict {
        /// Stream identifier.
        stream: String,
        /// Substream name.
        substream: String,
        /// End index of the conflicting batch.
        end_index: i64,
    },

    /// A stored chunk or journal frame carries a format version this build
    /// does not understand.
    #[error("unsupported encoding version: {0}")]
    UnsupportedVersion(u8),

    /// A binary frame could not be decoded, or a value does not fit the
    /// frame format (for example a name longer than its length prefix can
    /// represent).
    #[error("invalid binary frame: {0}")]
    Decode(String),

    /// Cold tier database error.
    #[error("cold tier error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Underlying I/O error (journal, snapshot).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Datapoint payload serialization error.
    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
