//! Hot-tier journal and snapshot files.
//!
//! The hot cache is an in-memory structure, but its contents - the cached
//! window, the length/watermark metadata and the pending/processing batch
//! queues - must survive a process restart. Durability follows the
//! journal-before-mutation contract:
//!
//! ```text
//! Client → journal append → sync → in-memory mutation → Ack
//! ```
//!
//! Every hot-tier mutation is appended as a CRC32-protected frame to
//! `hot.journal`. When the journal grows past a threshold, the full hot state
//! is written to `hot.snapshot` using an atomic write pattern (tmp file →
//! fsync → rename → fsync dir) and the journal is reset. Recovery loads the
//! snapshot (if present) and replays the journal on top, stopping with a
//! warning at the first corrupt frame - a torn tail from a crash mid-append.
//! The torn bytes are then truncated so the frames appended afterwards never
//! sit behind them on disk.

use crate::config::SyncMode;
use crate::error::{Result, StoreError};
use crate::model::{put_bytes_u32, put_str_u16, Batch, BatchKey, ByteReader, Coordinate, DatapointArray};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Journal file magic bytes.
const JOURNAL_MAGIC: [u8; 4] = *b"RILJ";

/// Snapshot file magic bytes.
const SNAPSHOT_MAGIC: [u8; 4] = *b"RILS";

/// Journal/snapshot format version.
const FORMAT_VERSION: u16 = 1;

/// File header size: magic (4) + version (2) + reserved (2).
const HEADER_SIZE: u64 = 8;

const JOURNAL_FILE: &str = "hot.journal";
const SNAPSHOT_FILE: &str = "hot.snapshot";

/// A single journaled hot-tier mutation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JournalOp {
    /// A batch appended to a coordinate (already restamped, with its
    /// absolute start index fixed).
    Insert(Batch),
    /// The first `count` pending batches moved to the processing queue.
    Dequeue {
        /// Number of batches dequeued.
        count: usize,
    },
    /// Batches removed from the processing queue after durable persistence.
    Clear {
        /// Identity keys of the cleared batches.
        keys: Vec<BatchKey>,
    },
    /// Cached entries below `up_to` discarded for a coordinate.
    Trim {
        /// The trimmed coordinate.
        coordinate: Coordinate,
        /// First retained absolute index.
        up_to: i64,
    },
    /// A stream and all its substreams removed.
    DeleteStream {
        /// Stream identifier.
        stream: String,
    },
    /// A single coordinate removed.
    DeleteSubstream {
        /// The removed coordinate.
        coordinate: Coordinate,
    },
}

const OP_INSERT: u8 = 1;
const OP_DEQUEUE: u8 = 2;
const OP_CLEAR: u8 = 3;
const OP_TRIM: u8 = 4;
const OP_DELETE_STREAM: u8 = 5;
const OP_DELETE_SUBSTREAM: u8 = 6;

impl JournalOp {
    fn encode(&self) -> Result<(u8, Vec<u8>)> {
        let mut buf = Vec::new();
        let code = match self {
            JournalOp::Insert(batch) => {
                put_str_u16(&mut buf, &batch.coordinate.stream)?;
                put_str_u16(&mut buf, &batch.coordinate.substream)?;
                buf.extend_from_slice(&batch.start_index.to_le_bytes());
                put_bytes_u32(&mut buf, &batch.data.encode()?);
                OP_INSERT
            }
            JournalOp::Dequeue { count } => {
                buf.extend_from_slice(&(*count as u32).to_le_bytes());
                OP_DEQUEUE
            }
            JournalOp::Clear { keys } => {
                buf.extend_from_slice(&(keys.len() as u32).to_le_bytes());
                for key in keys {
                    put_str_u16(&mut buf, &key.coordinate.stream)?;
                    put_str_u16(&mut buf, &key.coordinate.substream)?;
                    buf.extend_from_slice(&key.end_index.to_le_bytes());
                }
                OP_CLEAR
            }
            JournalOp::Trim { coordinate, up_to } => {
                put_str_u16(&mut buf, &coordinate.stream)?;
                put_str_u16(&mut buf, &coordinate.substream)?;
                buf.extend_from_slice(&up_to.to_le_bytes());
                OP_TRIM
            }
            JournalOp::DeleteStream { stream } => {
                put_str_u16(&mut buf, stream)?;
                OP_DELETE_STREAM
            }
            JournalOp::DeleteSubstream { coordinate } => {
                put_str_u16(&mut buf, &coordinate.stream)?;
                put_str_u16(&mut buf, &coordinate.substream)?;
                OP_DELETE_SUBSTREAM
            }
        };
        Ok((code, buf))
    }

    fn decode(code: u8, payload: &[u8]) -> Result<JournalOp> {
        let mut reader = ByteReader::new(payload);
        let op = match code {
            OP_INSERT => {
                let stream = reader.str_u16()?;
                let substream = reader.str_u16()?;
                let start_index = reader.i64()?;
                let data = DatapointArray::decode(reader.bytes_u32()?)?;
                JournalOp::Insert(Batch::new(
                    Coordinate::new(stream, substream),
                    start_index,
                    data,
                ))
            }
            OP_DEQUEUE => JournalOp::Dequeue {
                count: reader.u32()? as usize,
            },
            OP_CLEAR => {
                let count = reader.u32()? as usize;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    let stream = reader.str_u16()?;
                    let substream = reader.str_u16()?;
                    let end_index = reader.i64()?;
                    keys.push(BatchKey {
                        coordinate: Coordinate::new(stream, substream),
                        end_index,
                    });
                }
                JournalOp::Clear { keys }
            }
            OP_TRIM => {
                let stream = reader.str_u16()?;
                let substream = reader.str_u16()?;
                let up_to = reader.i64()?;
                JournalOp::Trim {
                    coordinate: Coordinate::new(stream, substream),
                    up_to,
                }
            }
            OP_DELETE_STREAM => JournalOp::DeleteStream {
                stream: reader.str_u16()?,
            },
            OP_DELETE_SUBSTREAM => {
                let stream = reader.str_u16()?;
                let substream = reader.str_u16()?;
                JournalOp::DeleteSubstream {
                    coordinate: Coordinate::new(stream, substream),
                }
            }
            other => {
                return Err(StoreError::Decode(format!("unknown journal op code {other}")));
            }
        };
        Ok(op)
    }
}

/// Append-only journal of hot-tier mutations plus its snapshot sibling.
pub(crate) struct Journal {
    dir: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
    sync_mode: SyncMode,
}

impl Journal {
    /// Opens (or creates) the journal under `dir` and returns it along with
    /// the latest snapshot payload and the ops recorded since.
    pub(crate) fn open(
        dir: &Path,
        sync_mode: SyncMode,
    ) -> Result<(Journal, Option<Vec<u8>>, Vec<JournalOp>)> {
        fs::create_dir_all(dir)?;

        let snapshot = read_snapshot(&dir.join(SNAPSHOT_FILE))?;
        let journal_path = dir.join(JOURNAL_FILE);
        let is_new = !journal_path.exists();
        let (ops, valid_len) = if is_new {
            (Vec::new(), 0)
        } else {
            read_frames(&journal_path)?
        };

        // The torn tail (or partial header) a crash leaves behind must not
        // sit in front of new frames: the next recovery would stop at the
        // garbage and drop every acknowledged frame appended after it.
        if !is_new {
            let actual = fs::metadata(&journal_path)?.len();
            if actual > valid_len {
                let file = OpenOptions::new().write(true).open(&journal_path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
                warn!(
                    dropped = actual - valid_len,
                    "truncated torn journal tail before reopening"
                );
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;
        let bytes = file.metadata()?.len();
        let mut journal = Journal {
            dir: dir.to_path_buf(),
            writer: BufWriter::new(file),
            bytes,
            sync_mode,
        };
        if is_new || bytes == 0 {
            journal.write_header()?;
        }

        debug!(
            ops = ops.len(),
            snapshot = snapshot.is_some(),
            "hot journal opened"
        );
        Ok((journal, snapshot, ops))
    }

    /// Current journal size in bytes.
    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Appends a single op and syncs per the configured mode.
    pub(crate) fn append(&mut self, op: &JournalOp) -> Result<()> {
        self.append_all(std::slice::from_ref(op))
    }

    /// Appends a run of ops with a single flush and sync at the end.
    ///
    /// All ops are encoded before any frame is buffered, so a rejected op
    /// (an oversized name, a non-serializable payload) leaves nothing behind
    /// that a later append could flush to disk.
    pub(crate) fn append_all(&mut self, ops: &[JournalOp]) -> Result<()> {
        let mut frames = Vec::with_capacity(ops.len());
        for op in ops {
            frames.push(op.encode()?);
        }
        for (code, payload) in &frames {
            let mut framed = Vec::with_capacity(payload.len() + 16);
            framed.push(*code);
            framed.extend_from_slice(payload);
            let crc = crc32fast::hash(&framed);

            self.writer.write_all(&[*code])?;
            self.writer
                .write_all(&(payload.len() as u32).to_le_bytes())?;
            self.writer.write_all(payload)?;
            self.writer.write_all(&crc.to_le_bytes())?;
            self.bytes += 1 + 4 + payload.len() as u64 + 4;
        }
        self.writer.flush()?;
        self.sync()?;
        Ok(())
    }

    /// Atomically replaces the snapshot with `payload` and resets the
    /// journal. On any error the previous snapshot and journal are left
    /// intact.
    pub(crate) fn checkpoint(&mut self, payload: &[u8]) -> Result<()> {
        let final_path = self.dir.join(SNAPSHOT_FILE);
        let tmp_path = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&SNAPSHOT_MAGIC)?;
            file.write_all(&FORMAT_VERSION.to_le_bytes())?;
            file.write_all(&[0u8; 2])?;
            file.write_all(&(payload.len() as u32).to_le_bytes())?;
            file.write_all(payload)?;
            file.write_all(&crc32fast::hash(payload).to_le_bytes())?;
            file.sync_all()?;
        }
        self.sync_dir()?;
        fs::rename(&tmp_path, &final_path)?;
        self.sync_dir()?;

        // Snapshot is durable; the journal can start over.
        let file = File::create(self.dir.join(JOURNAL_FILE))?;
        self.writer = BufWriter::new(file);
        self.bytes = 0;
        self.write_header()?;

        debug!(bytes = payload.len(), "hot snapshot checkpoint written");
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.writer.write_all(&JOURNAL_MAGIC)?;
        self.writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        self.writer.write_all(&[0u8; 2])?;
        self.writer.flush()?;
        self.sync()?;
        self.bytes = HEADER_SIZE;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Fsync => self.writer.get_ref().sync_all()?,
            SyncMode::Fdatasync => self.writer.get_ref().sync_data()?,
            SyncMode::None => {}
        }
        Ok(())
    }

    fn sync_dir(&self) -> Result<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Vec<u8>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = ByteReader::new(&bytes);
    let magic: [u8; 4] = reader.take(4)?.try_into().unwrap();
    if magic != SNAPSHOT_MAGIC {
        return Err(StoreError::Decode(format!(
            "invalid snapshot magic: {magic:?}"
        )));
    }
    let version = reader.u16()?;
    if version > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(version as u8));
    }
    reader.take(2)?; // reserved
    let payload = reader.bytes_u32()?.to_vec();
    let crc = reader.u32()?;
    let actual = crc32fast::hash(&payload);
    if crc != actual {
        return Err(StoreError::Decode(format!(
            "snapshot checksum mismatch: expected {crc}, got {actual}"
        )));
    }
    Ok(Some(payload))
}

/// Replays every valid frame and returns the ops along with the byte offset
/// just past the last one. Anything after that offset is a torn tail (or a
/// partial header) and must be truncated away before new frames are
/// appended, or a later recovery would stop there and drop them.
fn read_frames(path: &Path) -> Result<(Vec<JournalOp>, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_SIZE as usize];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        // A crash between create and header write leaves a short (possibly
        // empty) file; the whole thing is discarded.
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    }
    if header[0..4] != JOURNAL_MAGIC {
        return Err(StoreError::Decode(format!(
            "invalid journal magic: {:?}",
            &header[0..4]
        )));
    }
    let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
    if version > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(version as u8));
    }

    let mut ops = Vec::new();
    let mut valid_len = HEADER_SIZE;
    loop {
        let mut code = [0u8; 1];
        match reader.read_exact(&mut code) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut len_buf = [0u8; 4];
        if read_or_torn(&mut reader, &mut len_buf, ops.len())? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        if read_or_torn(&mut reader, &mut payload, ops.len())? {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if read_or_torn(&mut reader, &mut crc_buf, ops.len())? {
            break;
        }

        let mut framed = Vec::with_capacity(len + 1);
        framed.push(code[0]);
        framed.extend_from_slice(&payload);
        if crc32fast::hash(&framed) != u32::from_le_bytes(crc_buf) {
            warn!(
                replayed = ops.len(),
                "journal frame checksum mismatch, dropping tail"
            );
            break;
        }

        ops.push(JournalOp::decode(code[0], &payload)?);
        valid_len += 1 + 4 + len as u64 + 4;
    }
    Ok((ops, valid_len))
}

/// Reads into `buf`; a clean EOF mid-frame is a torn tail and returns true.
fn read_or_torn<R: Read>(reader: &mut R, buf: &mut [u8], replayed: usize) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            warn!(replayed, "torn journal frame at tail, dropping remainder");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}
