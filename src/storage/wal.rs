//! §4.2/§6: the write-ahead log. Records are appended without length
//! framing — record boundaries are derived purely from the leading type
//! byte and, for `Write`, the `after_size` field that follows it. Replay
//! stops at the first record it cannot fully parse, which is how a torn
//! write at the tail of the log (a crash mid-append) is tolerated.

use crate::errors::DbError;
use crate::types::{PageId, TransactionId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write as IoWrite};
use std::path::Path;

const TYPE_BEGIN: u8 = 1;
const TYPE_WRITE: u8 = 2;
const TYPE_COMMIT: u8 = 3;
const TYPE_ABORT: u8 = 4;

/// An upper bound on a single `Write` record's after-image, guarding replay
/// against a corrupt `after_size` field driving an unbounded allocation.
const MAX_AFTER_SIZE: i32 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Begin { txn: TransactionId, ts_ms: i64 },
    Write { txn: TransactionId, page_id: PageId, after: Vec<u8> },
    Commit { txn: TransactionId, ts_ms: i64 },
    Abort { txn: TransactionId, ts_ms: i64 },
}

impl Record {
    #[must_use]
    pub fn txn(&self) -> TransactionId {
        match self {
            Record::Begin { txn, .. }
            | Record::Write { txn, .. }
            | Record::Commit { txn, .. }
            | Record::Abort { txn, .. } => *txn,
        }
    }
}

/// Append-only log of `Begin`/`Write`/`Commit`/`Abort` records, guarded by a
/// single mutex so every append is effectively atomic with respect to other
/// appends (§4.2's "serialized via a per-log mutex").
pub struct WriteAheadLog {
    file: Mutex<File>,
    path: std::path::PathBuf,
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

impl WriteAheadLog {
    /// Opens (creating if absent) the log file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let file = OpenOptions::new().read(true).append(true).create(true).open(path)?;
        Ok(Self { file: Mutex::new(file), path: path.to_path_buf() })
    }

    /// # Errors
    /// Returns an error if the append fails.
    pub fn append_begin(&self, txn: TransactionId) -> Result<(), DbError> {
        let ts_ms = now_ms();
        let mut buf = Vec::with_capacity(13);
        buf.push(TYPE_BEGIN);
        buf.extend_from_slice(&txn.to_le_bytes());
        buf.extend_from_slice(&ts_ms.to_le_bytes());
        self.file.lock().write_all(&buf)?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the append fails or `after_image` exceeds the
    /// record size bound.
    pub fn append_write(&self, txn: TransactionId, page_id: PageId, after_image: &[u8]) -> Result<(), DbError> {
        let after_size = i32::try_from(after_image.len())
            .map_err(|_| DbError::Corrupted("WAL write record after-image too large".into()))?;
        if after_size < 0 || after_size > MAX_AFTER_SIZE {
            return Err(DbError::Corrupted("WAL write record after-image exceeds bound".into()));
        }
        let mut buf = Vec::with_capacity(17 + after_image.len());
        buf.push(TYPE_WRITE);
        buf.extend_from_slice(&txn.to_le_bytes());
        buf.extend_from_slice(&page_id.to_le_bytes());
        buf.extend_from_slice(&after_size.to_le_bytes());
        buf.extend_from_slice(after_image);
        self.file.lock().write_all(&buf)?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the append fails.
    pub fn append_commit(&self, txn: TransactionId) -> Result<(), DbError> {
        self.append_terminal(TYPE_COMMIT, txn)
    }

    /// # Errors
    /// Returns an error if the append fails.
    pub fn append_abort(&self, txn: TransactionId) -> Result<(), DbError> {
        self.append_terminal(TYPE_ABORT, txn)
    }

    fn append_terminal(&self, kind: u8, txn: TransactionId) -> Result<(), DbError> {
        let ts_ms = now_ms();
        let mut buf = Vec::with_capacity(13);
        buf.push(kind);
        buf.extend_from_slice(&txn.to_le_bytes());
        buf.extend_from_slice(&ts_ms.to_le_bytes());
        self.file.lock().write_all(&buf)?;
        Ok(())
    }

    /// Forces pending appends to stable storage.
    ///
    /// # Errors
    /// Returns an error if the underlying `sync_data` call fails.
    pub fn flush(&self) -> Result<(), DbError> {
        Ok(self.file.lock().sync_data()?)
    }

    /// Truncates the log to zero length and fsyncs.
    ///
    /// # Errors
    /// Returns an error if truncation or sync fails.
    pub fn truncate(&self) -> Result<(), DbError> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_data()?;
        Ok(())
    }

    /// Current length of the log file in bytes.
    ///
    /// # Errors
    /// Returns an error if the file's metadata cannot be read.
    pub fn current_size(&self) -> Result<u64, DbError> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Reads and parses every well-formed record from the start of the log,
    /// stopping silently at the first malformed or truncated record.
    ///
    /// # Errors
    /// Returns an error only if the log file cannot be read at all.
    pub fn read_all(&self) -> Result<Vec<Record>, DbError> {
        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(parse_records(&bytes))
    }
}

fn parse_records(bytes: &[u8]) -> Vec<Record> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    loop {
        let Some(&kind) = bytes.get(pos) else { break };
        pos += 1;
        let Some(txn_bytes) = bytes.get(pos..pos + 8) else { break };
        let txn = u64::from_le_bytes(txn_bytes.try_into().unwrap());
        pos += 8;
        match kind {
            TYPE_BEGIN | TYPE_COMMIT | TYPE_ABORT => {
                let Some(ts_bytes) = bytes.get(pos..pos + 8) else { break };
                let ts_ms = i64::from_le_bytes(ts_bytes.try_into().unwrap());
                pos += 8;
                records.push(match kind {
                    TYPE_BEGIN => Record::Begin { txn, ts_ms },
                    TYPE_COMMIT => Record::Commit { txn, ts_ms },
                    _ => Record::Abort { txn, ts_ms },
                });
            }
            TYPE_WRITE => {
                let Some(page_bytes) = bytes.get(pos..pos + 4) else { break };
                let page_id = u32::from_le_bytes(page_bytes.try_into().unwrap());
                pos += 4;
                let Some(size_bytes) = bytes.get(pos..pos + 4) else { break };
                let after_size = i32::from_le_bytes(size_bytes.try_into().unwrap());
                pos += 4;
                if after_size < 0 || after_size > MAX_AFTER_SIZE {
                    break;
                }
                let after_size = after_size as usize;
                let Some(after) = bytes.get(pos..pos + after_size) else { break };
                pos += after_size;
                records.push(Record::Write { txn, page_id, after: after.to_vec() });
            }
            _ => break,
        }
    }
    records
}
