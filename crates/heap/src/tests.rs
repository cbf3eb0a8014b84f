use super::*;
use common::TxnId;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;
use storage::DiskManager;
use tempfile::tempdir;
use txn::IsolationLevel;

struct Fixture {
    pool: BufferPool,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
    _dir: tempfile::TempDir,
    next_txn: u32,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("db.lat")).unwrap());
        let wal_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(disk.wal_path())
            .unwrap();
        let log = Arc::new(LogManager::new(wal_file, common::Lsn(1), true));
        let pool = BufferPool::new(disk, 16);
        pool.set_wal(log.clone());
        let locks = LockManager::start(Duration::from_millis(500), Duration::from_secs(3600));
        Self {
            pool,
            log,
            locks,
            _dir: dir,
            next_txn: 0,
        }
    }

    fn txn(&mut self) -> Transaction {
        self.next_txn += 1;
        Transaction::new(TxnId(self.next_txn), IsolationLevel::RepeatableRead)
    }

    fn heap(&self, txn: &mut Transaction) -> TableHeap {
        TableHeap::create(
            txn,
            TableOid(1),
            self.pool.clone(),
            self.log.clone(),
            self.locks.clone(),
        )
        .unwrap()
    }

    fn finish(&self, txn: &Transaction) {
        self.locks.release_all(txn.id());
    }
}

#[test]
fn insert_then_get_round_trips() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let rid = heap.insert(&mut txn, b"hello row").unwrap();
    assert_eq!(heap.get(&mut txn, rid).unwrap(), b"hello row");
    fx.finish(&txn);
}

#[test]
fn insert_records_undo_and_wal_chain() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let before = txn.last_lsn();
    let rid = heap.insert(&mut txn, b"x").unwrap();
    assert!(txn.last_lsn() > before);
    assert_eq!(
        txn.undo_log().last().unwrap(),
        &UndoRecord::Insert {
            table: TableOid(1),
            rid
        }
    );
    fx.finish(&txn);
}

#[test]
fn chain_grows_when_page_fills() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let big = vec![7u8; 1500];
    let a = heap.insert(&mut txn, &big).unwrap();
    let b = heap.insert(&mut txn, &big).unwrap();
    let c = heap.insert(&mut txn, &big).unwrap();

    assert_eq!(a.page_id, b.page_id);
    assert_ne!(a.page_id, c.page_id);
    assert_eq!(heap.get(&mut txn, c).unwrap(), big);
    fx.finish(&txn);
}

#[test]
fn update_in_place_keeps_rid() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let rid = heap.insert(&mut txn, b"long-initial-payload").unwrap();
    let new_rid = heap.update(&mut txn, rid, b"short").unwrap();
    assert_eq!(new_rid, rid);
    assert_eq!(heap.get(&mut txn, rid).unwrap(), b"short");
    fx.finish(&txn);
}

#[test]
fn oversized_update_relocates() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let rid = heap.insert(&mut txn, b"tiny").unwrap();
    let bigger = vec![3u8; 600];
    let new_rid = heap.update(&mut txn, rid, &bigger).unwrap();

    assert_ne!(new_rid, rid);
    assert_eq!(heap.get(&mut txn, new_rid).unwrap(), bigger);
    // Old rid is no longer visible.
    assert!(heap.get(&mut txn, rid).is_err());
    fx.finish(&txn);
}

#[test]
fn two_phase_delete_lifecycle() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let rid = heap.insert(&mut txn, b"doomed").unwrap();
    let old = heap.mark_delete(&mut txn, rid).unwrap();
    assert_eq!(old, b"doomed");
    assert!(heap.get(&mut txn, rid).is_err());

    // Abort path brings it back.
    heap.rollback_delete(rid, common::Lsn::ZERO).unwrap();
    assert_eq!(heap.get(&mut txn, rid).unwrap(), b"doomed");

    // Commit path tombstones it.
    heap.mark_delete(&mut txn, rid).unwrap();
    heap.apply_delete(rid, common::Lsn::ZERO).unwrap();
    assert!(heap.get(&mut txn, rid).is_err());
    fx.finish(&txn);
}

#[test]
fn scan_sees_own_writes_and_skips_own_deletes() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let r1 = heap.insert(&mut txn, b"one").unwrap();
    let _r2 = heap.insert(&mut txn, b"two").unwrap();
    let r3 = heap.insert(&mut txn, b"three").unwrap();
    heap.mark_delete(&mut txn, r1).unwrap();

    let mut cursor = heap.begin_scan(&txn).unwrap();
    let mut seen = Vec::new();
    while let Some((rid, bytes)) = heap.scan_next(&mut txn, &mut cursor).unwrap() {
        seen.push((rid, bytes));
    }
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, b"two");
    assert_eq!(seen[1].0, r3);
    fx.finish(&txn);
}

#[test]
fn scan_spans_pages_in_physical_order() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let payload = vec![1u8; 1500];
    for _ in 0..5 {
        heap.insert(&mut txn, &payload).unwrap();
    }

    let mut cursor = heap.begin_scan(&txn).unwrap();
    let mut rids = Vec::new();
    while let Some((rid, _)) = heap.scan_next(&mut txn, &mut cursor).unwrap() {
        rids.push(rid);
    }
    assert_eq!(rids.len(), 5);
    let mut sorted = rids.clone();
    sorted.sort();
    assert_eq!(rids, sorted);
    fx.finish(&txn);
}

#[test]
fn uncommitted_rows_block_other_readers_until_release() {
    let mut fx = Fixture::new();
    let mut writer = fx.txn();
    let heap = Arc::new(fx.heap(&mut writer));
    heap.insert(&mut writer, b"uncommitted").unwrap();

    let heap2 = Arc::clone(&heap);
    let locks = fx.locks.clone();
    let reader = std::thread::spawn(move || {
        let mut txn = Transaction::new(TxnId(99), IsolationLevel::ReadCommitted);
        let mut cursor = heap2.begin_scan(&txn).unwrap();
        let row = heap2.scan_next(&mut txn, &mut cursor).unwrap();
        locks.release_all(txn.id());
        row
    });

    std::thread::sleep(Duration::from_millis(100));
    // Writer "commits": locks released, mark nothing.
    fx.finish(&writer);

    let row = reader.join().unwrap();
    assert_eq!(row.unwrap().1, b"uncommitted");
}

#[test]
fn tuple_larger_than_page_is_rejected() {
    let mut fx = Fixture::new();
    let mut txn = fx.txn();
    let heap = fx.heap(&mut txn);

    let err = heap.insert(&mut txn, &vec![0u8; PAGE_SIZE]).unwrap_err();
    assert!(matches!(err, DbError::OutOfResources(_)));
    fx.finish(&txn);
}
