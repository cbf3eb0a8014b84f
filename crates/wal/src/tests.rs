use super::*;
use common::{Lsn, PageId, Rid, TableOid, TxnId};
use std::fs::OpenOptions;
use tempfile::tempdir;

fn open_log(path: &std::path::Path) -> LogManager {
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .unwrap();
    LogManager::new(file, Lsn(1), true)
}

fn insert_payload(slot: u16) -> LogPayload {
    LogPayload::Insert {
        table: TableOid(1),
        rid: Rid::new(PageId(2), slot),
        tuple: vec![1, 2, 3, slot as u8],
    }
}

#[test]
fn record_frame_round_trip() {
    let record = LogRecord {
        lsn: Lsn(42),
        prev_lsn: Lsn(40),
        txn_id: TxnId(7),
        payload: LogPayload::Update {
            table: TableOid(3),
            rid: Rid::new(PageId(9), 4),
            old: b"before".to_vec(),
            new: b"after".to_vec(),
        },
    };

    let frame = record.encode().unwrap();
    let (decoded, consumed) = LogRecord::decode(&frame).unwrap().unwrap();
    assert_eq!(consumed, frame.len());
    assert_eq!(decoded, record);
}

#[test]
fn decode_stops_on_truncated_frame() {
    let record = LogRecord {
        lsn: Lsn(1),
        prev_lsn: Lsn::ZERO,
        txn_id: TxnId(1),
        payload: insert_payload(0),
    };
    let frame = record.encode().unwrap();
    assert!(LogRecord::decode(&frame[..frame.len() - 3]).unwrap().is_none());
}

#[test]
fn decode_rejects_bit_rot_as_end_of_log() {
    let record = LogRecord {
        lsn: Lsn(1),
        prev_lsn: Lsn::ZERO,
        txn_id: TxnId(1),
        payload: insert_payload(0),
    };
    let mut frame = record.encode().unwrap();
    let mid = frame.len() / 2;
    frame[mid] ^= 0xFF;
    assert!(LogRecord::decode(&frame).unwrap().is_none());
}

#[test]
fn lsns_are_monotone_and_flush_advances_durable() {
    let dir = tempdir().unwrap();
    let log = open_log(&dir.path().join("db.lat.wal"));

    let l1 = log.append(TxnId(1), Lsn::ZERO, LogPayload::Begin).unwrap();
    let l2 = log.append(TxnId(1), l1, insert_payload(0)).unwrap();
    let l3 = log.append(TxnId(1), l2, LogPayload::Commit).unwrap();
    assert!(l1 < l2 && l2 < l3);
    assert_eq!(log.durable_lsn(), Lsn::ZERO);

    log.flush_to(l3).unwrap();
    assert!(log.durable_lsn() >= l3);
}

#[test]
fn replay_returns_appended_records_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.lat.wal");
    {
        let log = open_log(&path);
        let l1 = log.append(TxnId(9), Lsn::ZERO, LogPayload::Begin).unwrap();
        let l2 = log.append(TxnId(9), l1, insert_payload(1)).unwrap();
        log.append(TxnId(9), l2, LogPayload::Commit).unwrap();
        log.flush_all().unwrap();
    }

    let records = LogManager::replay(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].payload, LogPayload::Begin);
    assert_eq!(records[2].payload, LogPayload::Commit);
    assert_eq!(records[1].prev_lsn, records[0].lsn);

    // The sequence can be continued from the replayed maximum.
    let next = Lsn(records.last().unwrap().lsn.0 + 1);
    let file = OpenOptions::new().read(true).append(true).open(&path).unwrap();
    let log = LogManager::new(file, next, true);
    let l4 = log.append(TxnId(10), Lsn::ZERO, LogPayload::Begin).unwrap();
    assert_eq!(l4, next);
}

#[test]
fn replay_of_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let records = LogManager::replay(dir.path().join("absent.wal")).unwrap();
    assert!(records.is_empty());
}

#[test]
fn torn_tail_is_discarded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.lat.wal");
    {
        let log = open_log(&path);
        log.append(TxnId(1), Lsn::ZERO, LogPayload::Begin).unwrap();
        log.flush_all().unwrap();
    }
    // Simulate a crash mid-append: garbage half-frame at the tail.
    {
        use std::io::Write;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
    }

    let records = LogManager::replay(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, LogPayload::Begin);
}

#[test]
fn disabled_log_swallows_appends() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.lat.wal");
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(&path)
        .unwrap();
    let log = LogManager::new(file, Lsn(1), false);

    assert_eq!(
        log.append(TxnId(1), Lsn::ZERO, LogPayload::Begin).unwrap(),
        Lsn::ZERO
    );
    log.flush_all().unwrap();
    assert!(LogManager::replay(&path).unwrap().is_empty());
}

#[test]
fn checkpoint_payload_round_trips() {
    let record = LogRecord {
        lsn: Lsn(10),
        prev_lsn: Lsn::ZERO,
        txn_id: TxnId(0),
        payload: LogPayload::Checkpoint {
            active_txns: vec![(TxnId(3), Lsn(8)), (TxnId(4), Lsn(9))],
            dirty_pages: vec![(PageId(1), Lsn(5))],
        },
    };
    let frame = record.encode().unwrap();
    let (decoded, _) = LogRecord::decode(&frame).unwrap().unwrap();
    assert_eq!(decoded, record);
}
