//! ARIES-style restart recovery: analysis, redo, undo.
//!
//! Analysis scans the log and reconstructs the loser transactions (no
//! COMMIT or ABORT record). Redo replays page changes from the last
//! checkpoint; page application is idempotent, so pages that already
//! reached disk are left as they are. Undo walks each loser's prev_lsn
//! chain newest-first, applying compensating actions and logging CLRs;
//! already-written CLRs are honored with a skip count so a crash during
//! a previous abort does not double-undo.

use buffer::BufferPool;
use common::{DbResult, Lsn, Rid, TxnId};
use hashbrown::HashMap;
use storage::TablePage;
use tracing::{debug, info};
use wal::{Compensation, LogManager, LogPayload, LogRecord};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub redone: usize,
    pub losers: usize,
    pub undone: usize,
}

pub fn recover(
    pool: &BufferPool,
    log: &LogManager,
    records: &[LogRecord],
) -> DbResult<RecoveryReport> {
    if records.is_empty() {
        return Ok(RecoveryReport::default());
    }

    // --- Analysis ---
    // The log is never truncated here, so losers and their chain heads
    // come from a full scan; the last checkpoint (which flushed all dirty
    // pages before being written) bounds the redo work.
    let mut by_lsn: HashMap<Lsn, usize> = HashMap::new();
    let mut active: HashMap<TxnId, Lsn> = HashMap::new();
    let mut redo_from = 0;
    for (idx, record) in records.iter().enumerate() {
        by_lsn.insert(record.lsn, idx);
        match &record.payload {
            LogPayload::Commit | LogPayload::Abort => {
                active.remove(&record.txn_id);
            }
            LogPayload::Checkpoint { .. } => redo_from = idx + 1,
            _ => {
                active.insert(record.txn_id, record.lsn);
            }
        }
    }
    let losers = active;
    info!(
        records = records.len(),
        redo_from,
        losers = losers.len(),
        "recovery: analysis complete"
    );

    // --- Redo ---
    let mut report = RecoveryReport {
        losers: losers.len(),
        ..Default::default()
    };
    for record in &records[redo_from..] {
        if apply_redo(pool, record)? {
            report.redone += 1;
        }
    }

    // --- Undo ---
    let mut loser_list: Vec<(TxnId, Lsn)> = losers.into_iter().collect();
    loser_list.sort();
    for (txn_id, last_lsn) in loser_list {
        let mut undo_next = last_lsn;
        let mut skip = 0usize;
        while undo_next != Lsn::ZERO {
            let Some(&idx) = by_lsn.get(&undo_next) else {
                break;
            };
            let record = &records[idx];
            match &record.payload {
                LogPayload::Clr { .. } => skip += 1,
                LogPayload::Insert { table, rid, .. } => {
                    if skip > 0 {
                        skip -= 1;
                    } else {
                        let lsn = log.append(
                            txn_id,
                            record.lsn,
                            LogPayload::Clr {
                                undo_next: record.prev_lsn,
                                action: Compensation::Remove {
                                    table: *table,
                                    rid: *rid,
                                },
                            },
                        )?;
                        undo_remove(pool, *rid, lsn)?;
                        report.undone += 1;
                    }
                }
                LogPayload::Update { table, rid, old, .. } => {
                    if skip > 0 {
                        skip -= 1;
                    } else {
                        let lsn = log.append(
                            txn_id,
                            record.lsn,
                            LogPayload::Clr {
                                undo_next: record.prev_lsn,
                                action: Compensation::Restore {
                                    table: *table,
                                    rid: *rid,
                                    tuple: old.clone(),
                                },
                            },
                        )?;
                        undo_restore(pool, *rid, old, lsn)?;
                        report.undone += 1;
                    }
                }
                LogPayload::Delete { table, rid, old } => {
                    if skip > 0 {
                        skip -= 1;
                    } else {
                        let lsn = log.append(
                            txn_id,
                            record.lsn,
                            LogPayload::Clr {
                                undo_next: record.prev_lsn,
                                action: Compensation::Reinsert {
                                    table: *table,
                                    rid: *rid,
                                    tuple: old.clone(),
                                },
                            },
                        )?;
                        undo_reinsert(pool, *rid, old, lsn)?;
                        report.undone += 1;
                    }
                }
                // Structural growth and control records are not undone.
                LogPayload::Begin
                | LogPayload::Commit
                | LogPayload::Abort
                | LogPayload::NewPage { .. }
                | LogPayload::Checkpoint { .. } => {}
            }
            undo_next = record.prev_lsn;
        }
        let _ = log.append(txn_id, Lsn::ZERO, LogPayload::Abort)?;
        debug!(txn = txn_id.0, "recovery: loser rolled back");
    }

    // Recovery leaves a clean, durable state behind.
    log.flush_all()?;
    pool.flush_all()?;
    pool.disk().flush()?;
    info!(
        redone = report.redone,
        undone = report.undone,
        "recovery: complete"
    );
    Ok(report)
}

/// Replays one record against its page. Returns whether anything changed.
/// Every branch is idempotent: replaying over a page that already carries
/// the change is a no-op.
fn apply_redo(pool: &BufferPool, record: &LogRecord) -> DbResult<bool> {
    match &record.payload {
        LogPayload::NewPage {
            page_id, prev, ..
        } => {
            while pool.disk().num_pages() <= page_id.0 {
                pool.disk().allocate_page()?;
            }
            let mut guard = pool.fetch_write(*page_id)?;
            let mut page = TablePage::new(&mut guard);
            // A zeroed page has never been formatted.
            if page.view().free_ptr() == 0 {
                page.init(*page_id, *prev);
                guard.set_lsn(record.lsn);
            }
            drop(guard);
            if prev.is_valid() {
                let mut prev_guard = pool.fetch_write(*prev)?;
                TablePage::new(&mut prev_guard).set_next(*page_id);
                prev_guard.set_lsn(record.lsn);
            }
            Ok(true)
        }
        LogPayload::Insert { rid, tuple, .. } => redo_insert(pool, *rid, tuple, record.lsn),
        LogPayload::Update { rid, new, .. } => redo_overwrite(pool, *rid, new, record.lsn),
        LogPayload::Delete { rid, .. } => redo_delete(pool, *rid, record.lsn),
        LogPayload::Clr { action, .. } => match action {
            Compensation::Reinsert { rid, tuple, .. } => {
                undo_reinsert(pool, *rid, tuple, record.lsn)?;
                Ok(true)
            }
            Compensation::Restore { rid, tuple, .. } => {
                undo_restore(pool, *rid, tuple, record.lsn)?;
                Ok(true)
            }
            Compensation::Remove { rid, .. } => {
                undo_remove(pool, *rid, record.lsn)?;
                Ok(true)
            }
        },
        LogPayload::Begin
        | LogPayload::Commit
        | LogPayload::Abort
        | LogPayload::Checkpoint { .. } => Ok(false),
    }
}

fn redo_insert(pool: &BufferPool, rid: Rid, tuple: &[u8], lsn: Lsn) -> DbResult<bool> {
    let mut guard = pool.fetch_write(rid.page_id)?;
    let mut page = TablePage::new(&mut guard);
    let missing = rid.slot >= page.view().tuple_count() || page.view().is_tombstone(rid.slot);
    if missing {
        page.insert_tuple_at(rid.slot, tuple)?;
        guard.set_lsn(lsn);
        return Ok(true);
    }
    Ok(false)
}

fn redo_overwrite(pool: &BufferPool, rid: Rid, new: &[u8], lsn: Lsn) -> DbResult<bool> {
    let mut guard = pool.fetch_write(rid.page_id)?;
    let mut page = TablePage::new(&mut guard);
    if rid.slot < page.view().tuple_count() && !page.view().is_tombstone(rid.slot) {
        page.restore_in_place(rid.slot, new)?;
        guard.set_lsn(lsn);
        return Ok(true);
    }
    Ok(false)
}

fn redo_delete(pool: &BufferPool, rid: Rid, lsn: Lsn) -> DbResult<bool> {
    let mut guard = pool.fetch_write(rid.page_id)?;
    let mut page = TablePage::new(&mut guard);
    if rid.slot < page.view().tuple_count() && !page.view().is_tombstone(rid.slot) {
        page.apply_delete(rid.slot)?;
        guard.set_lsn(lsn);
        return Ok(true);
    }
    Ok(false)
}

/// Undo of an insert: the slot becomes a tombstone again.
fn undo_remove(pool: &BufferPool, rid: Rid, lsn: Lsn) -> DbResult<()> {
    let mut guard = pool.fetch_write(rid.page_id)?;
    let mut page = TablePage::new(&mut guard);
    if rid.slot < page.view().tuple_count() && !page.view().is_tombstone(rid.slot) {
        page.apply_delete(rid.slot)?;
        guard.set_lsn(lsn);
    }
    Ok(())
}

/// Undo of an update: the before-image comes back.
fn undo_restore(pool: &BufferPool, rid: Rid, old: &[u8], lsn: Lsn) -> DbResult<()> {
    let mut guard = pool.fetch_write(rid.page_id)?;
    let mut page = TablePage::new(&mut guard);
    if rid.slot < page.view().tuple_count() && !page.view().is_tombstone(rid.slot) {
        page.restore_in_place(rid.slot, old)?;
        guard.set_lsn(lsn);
    }
    Ok(())
}

/// Undo of a delete: reinsert at the original RID, whatever state the
/// slot crashed in (marked, tombstoned, or already restored).
fn undo_reinsert(pool: &BufferPool, rid: Rid, old: &[u8], lsn: Lsn) -> DbResult<()> {
    let mut guard = pool.fetch_write(rid.page_id)?;
    let mut page = TablePage::new(&mut guard);
    if rid.slot >= page.view().tuple_count() || page.view().is_tombstone(rid.slot) {
        page.insert_tuple_at(rid.slot, old)?;
    } else if page.view().is_delete_marked(rid.slot) {
        page.rollback_delete(rid.slot)?;
    } else {
        return Ok(());
    }
    guard.set_lsn(lsn);
    Ok(())
}
