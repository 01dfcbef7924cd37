//! Cold tier: the durable SQLite chunk store.
//!
//! Compacted batches land here as immutable rows in a single `datastream`
//! table, keyed by `(streamid, substream, endindex)`. Each row carries the
//! chunk's last timestamp (for time-indexed lookups), the encoding version
//! and the versioned binary blob of its datapoints.
//!
//! The primary key makes batch delivery idempotent: re-delivering a chunk
//! that already landed (a compactor crash between commit and queue clear)
//! compares payloads and skips the duplicate, while a differing payload at
//! the same key aborts the whole transaction with
//! [`StoreError::Conflict`](crate::error::StoreError::Conflict).

use crate::error::{Result, StoreError};
use crate::model::{Batch, Coordinate, DatapointArray, CHUNK_VERSION};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS datastream (
    streamid  TEXT    NOT NULL,
    substream TEXT    NOT NULL,
    endindex  INTEGER NOT NULL,
    endtime   REAL    NOT NULL,
    version   INTEGER NOT NULL,
    data      BLOB    NOT NULL,
    PRIMARY KEY (streamid, substream, endindex)
);
CREATE INDEX IF NOT EXISTS datastream_time
    ON datastream (streamid, substream, endtime);
";

/// A durable chunk row, decoded.
#[derive(Debug, Clone)]
pub(crate) struct ChunkRow {
    /// Absolute index one past the chunk's last datapoint.
    pub end_index: i64,
    /// The chunk's datapoints.
    pub data: DatapointArray,
}

impl ChunkRow {
    /// Absolute index of the chunk's first datapoint.
    pub fn start_index(&self) -> i64 {
        self.end_index - self.data.len() as i64
    }
}

/// Cold-tier gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColdStats {
    /// Durable chunk rows.
    pub chunks: u64,
    /// Coordinates with at least one durable chunk.
    pub coordinates: u64,
}

/// The durable chunk store, backed by a single SQLite database.
///
/// The connection is shared behind a mutex so that lazily-fetching range
/// iterators can read while the compaction loop writes. Cloning is cheap
/// and shares the connection.
#[derive(Clone)]
pub struct ColdStore {
    conn: Arc<Mutex<Connection>>,
}

impl ColdStore {
    /// Opens (or creates) the chunk store at `path`.
    pub fn open(path: &Path) -> Result<ColdStore> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(CREATE_TABLE)?;
        Ok(ColdStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persists a run of batches in one transaction.
    ///
    /// A batch whose key already exists with an identical payload is skipped
    /// (idempotent re-delivery); a differing payload aborts the transaction
    /// with [`StoreError::Conflict`].
    pub fn write_batches(&self, batches: &[Batch]) -> Result<()> {
        if batches.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for batch in batches {
            if batch.data.is_empty() {
                continue;
            }
            let blob = batch.data.encode()?;
            let end_index = batch.end_index();
            let existing: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT data FROM datastream
                     WHERE streamid = ?1 AND substream = ?2 AND endindex = ?3",
                    params![batch.coordinate.stream, batch.coordinate.substream, end_index],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(ref prior) if *prior == blob => {
                    debug!(
                        coordinate = %batch.coordinate,
                        end_index,
                        "skipping re-delivered chunk"
                    );
                    continue;
                }
                Some(_) => {
                    return Err(StoreError::Conflict {
                        stream: batch.coordinate.stream.clone(),
                        substream: batch.coordinate.substream.clone(),
                        end_index,
                    });
                }
                None => {}
            }
            let end_time = batch.data.end_time().unwrap_or(0.0);
            tx.execute(
                "INSERT INTO datastream (streamid, substream, endindex, endtime, version, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    batch.coordinate.stream,
                    batch.coordinate.substream,
                    end_index,
                    end_time,
                    CHUNK_VERSION,
                    blob
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Appends `data` directly at a coordinate's current durable end.
    ///
    /// Read-then-insert without a coordinate lock: safe because the
    /// compaction loop is the only writer for any given coordinate.
    pub fn append(&self, stream: &str, substream: &str, data: DatapointArray) -> Result<()> {
        let (end_index, _) = self.durable_end(stream, substream)?;
        self.write_batches(&[Batch::new(
            Coordinate::new(stream, substream),
            end_index,
            data,
        )])
    }

    /// The durable end of a coordinate: `(end_index, end_time)` of its last
    /// chunk, or `(0, 0.0)` when nothing has been compacted yet.
    pub fn durable_end(&self, stream: &str, substream: &str) -> Result<(i64, f64)> {
        let conn = self.conn.lock();
        let row: Option<(i64, f64)> = conn
            .query_row(
                "SELECT endindex, endtime FROM datastream
                 WHERE streamid = ?1 AND substream = ?2
                 ORDER BY endindex DESC LIMIT 1",
                params![stream, substream],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.unwrap_or((0, 0.0)))
    }

    /// Every coordinate with durable chunks, with its durable end index and
    /// last timestamp. Used to re-seed the hot tier at open.
    pub(crate) fn coordinates(&self) -> Result<Vec<(Coordinate, i64, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT streamid, substream, MAX(endindex), MAX(endtime)
             FROM datastream GROUP BY streamid, substream",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                Coordinate::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Fetches and decodes the chunk covering the first durable index
    /// greater than `index`, or `None` past the durable end.
    pub(crate) fn chunk_after(
        &self,
        coordinate: &Coordinate,
        index: i64,
    ) -> Result<Option<ChunkRow>> {
        let conn = self.conn.lock();
        let row: Option<(i64, i64, Vec<u8>)> = conn
            .query_row(
                "SELECT endindex, version, data FROM datastream
                 WHERE streamid = ?1 AND substream = ?2 AND endindex > ?3
                 ORDER BY endindex LIMIT 1",
                params![coordinate.stream, coordinate.substream, index],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((end_index, version, blob)) = row else {
            return Ok(None);
        };
        drop(conn);
        self.decode_chunk(coordinate, end_index, version, &blob)
            .map(Some)
    }

    /// Absolute index of the first durable datapoint with timestamp `>= t`,
    /// or `None` when every durable datapoint is older (the hot tier then
    /// owns the answer).
    pub(crate) fn time_index(
        &self,
        coordinate: &Coordinate,
        t: f64,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let row: Option<(i64, i64, Vec<u8>)> = conn
            .query_row(
                "SELECT endindex, version, data FROM datastream
                 WHERE streamid = ?1 AND substream = ?2 AND endtime >= ?3
                 ORDER BY endindex LIMIT 1",
                params![coordinate.stream, coordinate.substream, t],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((end_index, version, blob)) = row else {
            return Ok(None);
        };
        drop(conn);
        let chunk = self.decode_chunk(coordinate, end_index, version, &blob)?;
        // All prior chunks end before t, so the boundary is inside this one.
        let pos = chunk.data.first_at_or_after(t) as i64;
        Ok(Some(chunk.start_index() + pos))
    }

    /// Deletes every durable chunk of a stream.
    pub fn delete_stream(&self, stream: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM datastream WHERE streamid = ?1",
            params![stream],
        )?;
        Ok(())
    }

    /// Deletes every durable chunk of a single coordinate.
    pub fn delete_substream(&self, stream: &str, substream: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM datastream WHERE streamid = ?1 AND substream = ?2",
            params![stream, substream],
        )?;
        Ok(())
    }

    /// Wipes every durable chunk. Intended for tests and debugging only.
    pub fn clear(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM datastream", [])?;
        Ok(())
    }

    /// Current cold-tier gauges.
    pub fn stats(&self) -> Result<ColdStats> {
        let conn = self.conn.lock();
        let chunks: u64 = conn.query_row("SELECT COUNT(*) FROM datastream", [], |row| row.get(0))?;
        let coordinates: u64 = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT streamid, substream FROM datastream)",
            [],
            |row| row.get(0),
        )?;
        Ok(ColdStats {
            chunks,
            coordinates,
        })
    }

    fn decode_chunk(
        &self,
        coordinate: &Coordinate,
        end_index: i64,
        version: i64,
        blob: &[u8],
    ) -> Result<ChunkRow> {
        let corrupt = |reason: String| StoreError::Corruption {
            stream: coordinate.stream.clone(),
            substream: coordinate.substream.clone(),
            end_index,
            reason,
        };
        if version != CHUNK_VERSION as i64 {
            return Err(corrupt(format!("unsupported chunk version {version}")));
        }
        let data =
            DatapointArray::decode(blob).map_err(|e| corrupt(format!("undecodable chunk: {e}")))?;
        if data.is_empty() {
            return Err(corrupt("empty chunk".to_string()));
        }
        if end_index < data.len() as i64 {
            return Err(corrupt(format!(
                "chunk of {} datapoints cannot end at index {end_index}",
                data.len()
            )));
        }
        Ok(ChunkRow { end_index, data })
    }
}
