use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, Lsn, PageId, Rid, TableOid, TxnId};
use serde::{Deserialize, Serialize};

/// Fixed-width little-endian framing for WAL serialization.
fn bincode_config() -> impl Config {
    config::legacy()
}

/// Logical content of one log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    /// Tuple bytes inserted at `rid`.
    Insert {
        table: TableOid,
        rid: Rid,
        tuple: Vec<u8>,
    },
    /// In-place overwrite; both images kept for redo and undo.
    Update {
        table: TableOid,
        rid: Rid,
        old: Vec<u8>,
        new: Vec<u8>,
    },
    /// Delete with the before-image for undo.
    Delete {
        table: TableOid,
        rid: Rid,
        old: Vec<u8>,
    },
    /// A table grew by one page, linked after `prev`.
    NewPage {
        table: TableOid,
        page_id: PageId,
        prev: PageId,
    },
    Checkpoint {
        active_txns: Vec<(TxnId, Lsn)>,
        dirty_pages: Vec<(PageId, Lsn)>,
    },
    /// Compensation record written while undoing a loser or aborting;
    /// `undo_next` points at the next record of the same transaction left
    /// to undo.
    Clr {
        undo_next: Lsn,
        action: Compensation,
    },
}

/// The redo side of a compensation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Compensation {
    /// Undo of a delete: the row comes back at its old RID.
    Reinsert {
        table: TableOid,
        rid: Rid,
        tuple: Vec<u8>,
    },
    /// Undo of an update: the before-image is restored.
    Restore {
        table: TableOid,
        rid: Rid,
        tuple: Vec<u8>,
    },
    /// Undo of an insert: the row disappears again.
    Remove { table: TableOid, rid: Rid },
}

impl LogPayload {
    /// On-disk kind tag.
    pub fn kind(&self) -> u8 {
        match self {
            LogPayload::Begin => 0,
            LogPayload::Commit => 1,
            LogPayload::Abort => 2,
            LogPayload::Insert { .. } => 3,
            LogPayload::Update { .. } => 4,
            LogPayload::Delete { .. } => 5,
            LogPayload::NewPage { .. } => 6,
            LogPayload::Checkpoint { .. } => 7,
            LogPayload::Clr { .. } => 8,
        }
    }
}

/// One framed record as it appears in the log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub payload: LogPayload,
}

impl LogRecord {
    /// Encodes the full frame including the length prefix and CRC trailer.
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let payload = encode_to_vec(&self.payload, bincode_config())
            .map_err(|e| DbError::Internal(format!("encode log payload: {e}")))?;

        let body_len = 8 + 8 + 4 + 1 + payload.len() + 4;
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_le_bytes());
        out.extend_from_slice(&self.lsn.0.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.0.to_le_bytes());
        out.extend_from_slice(&self.txn_id.0.to_le_bytes());
        out.push(self.payload.kind());
        out.extend_from_slice(&payload);

        let crc = crc32fast::hash(&out[4..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Decodes one frame from `bytes`, returning the record and the number
    /// of bytes consumed. `Ok(None)` means a clean or torn end of log.
    pub fn decode(bytes: &[u8]) -> DbResult<Option<(LogRecord, usize)>> {
        if bytes.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        if body_len < 8 + 8 + 4 + 1 + 4 || bytes.len() < 4 + body_len {
            return Ok(None);
        }
        let body = &bytes[4..4 + body_len];
        let (content, crc_bytes) = body.split_at(body_len - 4);
        let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        if crc32fast::hash(content) != stored_crc {
            // A mismatch at the tail is a torn write from the last crash;
            // replay stops here.
            tracing::warn!("log record checksum mismatch; treating as end of log");
            return Ok(None);
        }

        let lsn = Lsn(u64::from_le_bytes(content[0..8].try_into().unwrap()));
        let prev_lsn = Lsn(u64::from_le_bytes(content[8..16].try_into().unwrap()));
        let txn_id = TxnId(u32::from_le_bytes(content[16..20].try_into().unwrap()));
        let kind = content[20];

        let (payload, _): (LogPayload, usize) =
            decode_from_slice(&content[21..], bincode_config())
                .map_err(|e| DbError::Corruption(format!("decode log payload: {e}")))?;
        if payload.kind() != kind {
            return Err(DbError::Corruption(format!(
                "log record kind byte {kind} does not match payload"
            )));
        }

        Ok(Some((
            LogRecord {
                lsn,
                prev_lsn,
                txn_id,
                payload,
            },
            4 + body_len,
        )))
    }
}
