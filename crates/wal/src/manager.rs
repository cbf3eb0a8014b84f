use crate::record::{LogPayload, LogRecord};
use common::{DbResult, Lsn, TxnId, WalSync};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Appends records, assigns LSNs, and flushes with group commit.
///
/// `append` only stages the encoded frame in an in-memory tail;
/// `flush_to` writes and fsyncs the whole tail at once, so every committer
/// that arrives while a flush is pending rides the same fsync.
pub struct LogManager {
    enabled: bool,
    inner: Mutex<Inner>,
    next_lsn: AtomicU64,
    durable: AtomicU64,
}

struct Inner {
    file: File,
    tail: Vec<u8>,
    /// Highest LSN currently sitting in `tail`.
    tail_lsn: Lsn,
}

impl LogManager {
    /// `next_lsn` continues the sequence found in an existing log; pass
    /// `Lsn(1)` for a fresh database.
    pub fn new(file: File, next_lsn: Lsn, enabled: bool) -> Self {
        assert!(next_lsn.0 >= 1, "LSN 0 is reserved");
        Self {
            enabled,
            inner: Mutex::new(Inner {
                file,
                tail: Vec::new(),
                tail_lsn: Lsn(next_lsn.0 - 1),
            }),
            next_lsn: AtomicU64::new(next_lsn.0),
            durable: AtomicU64::new(next_lsn.0 - 1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Appends a record and returns its LSN (`Lsn::ZERO` when logging is
    /// disabled). The record is not durable until `flush_to` covers it.
    pub fn append(&self, txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> DbResult<Lsn> {
        if !self.enabled {
            return Ok(Lsn::ZERO);
        }
        let mut inner = self.inner.lock();
        let lsn = Lsn(self.next_lsn.fetch_add(1, Ordering::SeqCst));
        let record = LogRecord {
            lsn,
            prev_lsn,
            txn_id,
            payload,
        };
        let frame = record.encode()?;
        inner.tail.extend_from_slice(&frame);
        inner.tail_lsn = lsn;
        Ok(lsn)
    }

    /// Blocks until the log is durable at least up to `lsn`.
    pub fn flush_to(&self, lsn: Lsn) -> DbResult<()> {
        if !self.enabled || self.durable_lsn() >= lsn {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if Lsn(self.durable.load(Ordering::SeqCst)) >= lsn {
            // Another committer flushed past us while we waited.
            return Ok(());
        }
        let tail = std::mem::take(&mut inner.tail);
        let tail_lsn = inner.tail_lsn;
        if !tail.is_empty() {
            inner.file.write_all(&tail)?;
        }
        inner.file.sync_all()?;
        self.durable.store(tail_lsn.0, Ordering::SeqCst);
        Ok(())
    }

    /// Flushes everything appended so far.
    pub fn flush_all(&self) -> DbResult<()> {
        let last = Lsn(self.next_lsn.load(Ordering::SeqCst).saturating_sub(1));
        self.flush_to(last)
    }

    pub fn durable_lsn(&self) -> Lsn {
        Lsn(self.durable.load(Ordering::SeqCst))
    }

    pub fn last_lsn(&self) -> Lsn {
        Lsn(self.next_lsn.load(Ordering::SeqCst).saturating_sub(1))
    }

    /// Reads every well-formed record from a log file, stopping at the
    /// first torn or truncated frame.
    pub fn replay(path: impl AsRef<Path>) -> DbResult<Vec<LogRecord>> {
        let mut bytes = Vec::new();
        match File::open(path.as_ref()) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        let mut records = Vec::new();
        let mut pos = 0;
        while let Some((record, consumed)) = LogRecord::decode(&bytes[pos..])? {
            records.push(record);
            pos += consumed;
        }
        if pos < bytes.len() {
            tracing::warn!(
                discarded = bytes.len() - pos,
                "discarding torn bytes at log tail"
            );
        }
        Ok(records)
    }
}

impl WalSync for LogManager {
    fn durable_lsn(&self) -> Lsn {
        LogManager::durable_lsn(self)
    }

    fn flush_to(&self, lsn: Lsn) -> DbResult<()> {
        LogManager::flush_to(self, lsn)
    }
}
