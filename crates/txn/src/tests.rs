use super::*;
use common::{DbError, PageId, Rid, TableOid, TxnId};
use std::sync::Arc;
use std::time::Duration;

fn manager(timeout_ms: u64) -> Arc<LockManager> {
    // Long detector interval: tests trigger sweeps explicitly.
    LockManager::start(Duration::from_millis(timeout_ms), Duration::from_secs(3600))
}

fn txn(id: u32) -> Transaction {
    Transaction::new(TxnId(id), IsolationLevel::RepeatableRead)
}

const T: TableOid = TableOid(1);

fn rid(slot: u16) -> Rid {
    Rid::new(PageId(2), slot)
}

#[test]
fn shared_locks_coexist() {
    let lm = manager(200);
    let t1 = txn(1);
    let t2 = txn(2);

    lm.lock_table(&t1, LockMode::Is, T).unwrap();
    lm.lock_table(&t2, LockMode::Is, T).unwrap();
    lm.lock_row(&t1, LockMode::S, T, rid(0)).unwrap();
    lm.lock_row(&t2, LockMode::S, T, rid(0)).unwrap();
}

#[test]
fn exclusive_conflicts_time_out() {
    let lm = manager(100);
    let t1 = txn(1);
    let t2 = txn(2);

    lm.lock_table(&t1, LockMode::Ix, T).unwrap();
    lm.lock_row(&t1, LockMode::X, T, rid(0)).unwrap();

    lm.lock_table(&t2, LockMode::Ix, T).unwrap();
    let err = lm.lock_row(&t2, LockMode::X, T, rid(0)).unwrap_err();
    assert!(matches!(err, DbError::Timeout(_)));
}

#[test]
fn release_unblocks_waiter() {
    let lm = manager(2_000);
    let t1 = txn(1);
    lm.lock_table(&t1, LockMode::Ix, T).unwrap();
    lm.lock_row(&t1, LockMode::X, T, rid(0)).unwrap();

    let lm2 = Arc::clone(&lm);
    let waiter = std::thread::spawn(move || {
        let t2 = txn(2);
        lm2.lock_table(&t2, LockMode::Ix, T).unwrap();
        lm2.lock_row(&t2, LockMode::X, T, rid(0))
    });

    std::thread::sleep(Duration::from_millis(50));
    lm.release_all(TxnId(1));
    waiter.join().unwrap().unwrap();
}

#[test]
fn row_lock_requires_intent() {
    let lm = manager(100);
    let t1 = txn(1);
    let err = lm.lock_row(&t1, LockMode::X, T, rid(0)).unwrap_err();
    assert!(matches!(err, DbError::Internal(_)));

    // IS is not enough for a row X lock.
    lm.lock_table(&t1, LockMode::Is, T).unwrap();
    let err = lm.lock_row(&t1, LockMode::X, T, rid(0)).unwrap_err();
    assert!(matches!(err, DbError::Internal(_)));
}

#[test]
fn s_plus_ix_upgrades_to_six() {
    let lm = manager(100);
    let t1 = txn(1);

    lm.lock_table(&t1, LockMode::S, T).unwrap();
    lm.lock_table(&t1, LockMode::Ix, T).unwrap();
    assert_eq!(
        lm.holding(TxnId(1), LockResource::Table(T)),
        Some(LockMode::Six)
    );
}

#[test]
fn reacquire_of_covered_mode_is_noop() {
    let lm = manager(100);
    let t1 = txn(1);

    lm.lock_table(&t1, LockMode::X, T).unwrap();
    lm.lock_table(&t1, LockMode::S, T).unwrap();
    lm.lock_table(&t1, LockMode::Is, T).unwrap();
    assert_eq!(
        lm.holding(TxnId(1), LockResource::Table(T)),
        Some(LockMode::X)
    );
}

#[test]
fn deadlock_aborts_youngest() {
    let lm = manager(5_000);
    let t1 = txn(1);
    let t2 = txn(2);

    lm.lock_table(&t1, LockMode::Ix, T).unwrap();
    lm.lock_table(&t2, LockMode::Ix, T).unwrap();
    lm.lock_row(&t1, LockMode::X, T, rid(0)).unwrap();
    lm.lock_row(&t2, LockMode::X, T, rid(1)).unwrap();

    // t1 waits for rid 1 while t2 waits for rid 0.
    let lm1 = Arc::clone(&lm);
    let older = std::thread::spawn(move || {
        let t1 = txn(1);
        lm1.lock_row(&t1, LockMode::X, T, rid(1))
    });

    let lm2 = Arc::clone(&lm);
    let younger = std::thread::spawn(move || {
        let t2 = txn(2);
        std::thread::sleep(Duration::from_millis(50));
        lm2.lock_row(&t2, LockMode::X, T, rid(0))
    });

    // Let both enqueue, then run a detection sweep.
    std::thread::sleep(Duration::from_millis(300));
    lm.run_deadlock_check();

    let young_result = younger.join().unwrap();
    assert!(matches!(young_result, Err(DbError::Conflict(_))));

    // The victim's locks go away and the older transaction proceeds.
    lm.release_all(TxnId(2));
    older.join().unwrap().unwrap();
}

#[test]
fn unlock_single_resource() {
    let lm = manager(100);
    let t1 = txn(1);
    let t2 = txn(2);

    lm.lock_table(&t1, LockMode::Is, T).unwrap();
    lm.lock_row(&t1, LockMode::S, T, rid(0)).unwrap();
    lm.unlock(TxnId(1), LockResource::Row(T, rid(0)));

    lm.lock_table(&t2, LockMode::Ix, T).unwrap();
    lm.lock_row(&t2, LockMode::X, T, rid(0)).unwrap();
}

#[test]
fn finished_transactions_cannot_lock() {
    let lm = manager(100);
    let mut t1 = txn(1);
    t1.set_state(TxnState::Committed);
    let err = lm.lock_table(&t1, LockMode::Is, T).unwrap_err();
    assert!(matches!(err, DbError::Internal(_)));
}
