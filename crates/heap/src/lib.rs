//! Table heap: a linked list of slotted pages holding one table's rows.
//!
//! Every mutation takes the appropriate row lock, appends a WAL record on
//! the transaction's prev_lsn chain, and stamps the page guard with the
//! record's LSN so the buffer pool can enforce the WAL rule. Deletes are
//! two-phase: `mark_delete` hides the row, commit applies the tombstone,
//! abort rolls the mark back.

use buffer::BufferPool;
use common::{DbError, DbResult, Lsn, PageId, Rid, TableOid, PAGE_SIZE};
use std::sync::Arc;
use storage::{TablePage, TablePageView, SLOT_BYTES, TABLE_PAGE_HEADER};
use txn::{IsolationLevel, LockManager, LockMode, LockResource, Transaction, UndoRecord};
use wal::{LogManager, LogPayload};

/// Largest payload a single page can hold.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - TABLE_PAGE_HEADER - SLOT_BYTES;

/// Physical-order scan position; advanced by [`TableHeap::scan_next`].
#[derive(Clone, Copy, Debug)]
pub struct ScanCursor {
    page: PageId,
    next_slot: u16,
}

/// Handle to one table's page chain.
pub struct TableHeap {
    table: TableOid,
    first_page: PageId,
    pool: BufferPool,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
}

impl TableHeap {
    /// Creates the first page of a new table and logs it.
    pub fn create(
        txn: &mut Transaction,
        table: TableOid,
        pool: BufferPool,
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
    ) -> DbResult<Self> {
        let mut guard = pool.new_page()?;
        let first_page = guard.page_id();
        TablePage::new(&mut guard).init(first_page, PageId::INVALID);
        let lsn = log.append(
            txn.id(),
            txn.last_lsn(),
            LogPayload::NewPage {
                table,
                page_id: first_page,
                prev: PageId::INVALID,
            },
        )?;
        txn.set_last_lsn(lsn);
        guard.set_lsn(lsn);
        drop(guard);
        Ok(Self {
            table,
            first_page,
            pool,
            log,
            locks,
        })
    }

    /// Opens an existing table rooted at `first_page`.
    pub fn open(
        table: TableOid,
        first_page: PageId,
        pool: BufferPool,
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            table,
            first_page,
            pool,
            log,
            locks,
        }
    }

    pub fn table_oid(&self) -> TableOid {
        self.table
    }

    pub fn first_page(&self) -> PageId {
        self.first_page
    }

    /// Inserts serialized tuple bytes, walking the chain for free space and
    /// growing it by one page when nothing fits.
    pub fn insert(&self, txn: &mut Transaction, bytes: &[u8]) -> DbResult<Rid> {
        if bytes.len() > MAX_TUPLE_SIZE {
            return Err(DbError::OutOfResources(format!(
                "tuple of {} bytes exceeds page capacity",
                bytes.len()
            )));
        }
        self.locks.lock_table(txn, LockMode::Ix, self.table)?;

        let mut page_id = self.first_page;
        loop {
            let mut guard = self.pool.fetch_write(page_id)?;
            let mut page = TablePage::new(&mut guard);
            if let Some(slot) = page.insert_tuple(bytes) {
                let rid = Rid::new(page_id, slot);
                // X lock before the guard drops, so no reader can observe
                // the row first. The rid is fresh; this cannot block.
                self.locks.lock_row(txn, LockMode::X, self.table, rid)?;
                let lsn = self.log.append(
                    txn.id(),
                    txn.last_lsn(),
                    LogPayload::Insert {
                        table: self.table,
                        rid,
                        tuple: bytes.to_vec(),
                    },
                )?;
                txn.set_last_lsn(lsn);
                guard.set_lsn(lsn);
                txn.push_undo(UndoRecord::Insert {
                    table: self.table,
                    rid,
                });
                return Ok(rid);
            }

            let next = page.view().next();
            if next.is_valid() {
                page_id = next;
                continue;
            }

            // End of chain: grow by one page and link it in.
            let mut new_guard = self.pool.new_page()?;
            let new_page_id = new_guard.page_id();
            TablePage::new(&mut new_guard).init(new_page_id, page_id);
            let lsn = self.log.append(
                txn.id(),
                txn.last_lsn(),
                LogPayload::NewPage {
                    table: self.table,
                    page_id: new_page_id,
                    prev: page_id,
                },
            )?;
            txn.set_last_lsn(lsn);
            new_guard.set_lsn(lsn);
            TablePage::new(&mut guard).set_next(new_page_id);
            guard.set_lsn(lsn);
            drop(new_guard);
            drop(guard);
            page_id = new_page_id;
        }
    }

    /// Reads a live row under the caller's isolation level.
    pub fn get(&self, txn: &mut Transaction, rid: Rid) -> DbResult<Vec<u8>> {
        let own_write = self.holds_x(txn, rid);
        if !own_write {
            self.locks.lock_table(txn, LockMode::Is, self.table)?;
            self.locks.lock_row(txn, LockMode::S, self.table, rid)?;
        }
        let result = self.read_live(rid);
        // Read-committed drops the lock after every read. A failed read
        // drops it under any isolation: the row is gone, and a retained
        // lock on a reusable tombstone could stall a later inserter that
        // is holding the page latch.
        let release = !own_write
            && (txn.isolation() == IsolationLevel::ReadCommitted || result.is_err());
        if release {
            self.locks
                .unlock(txn.id(), LockResource::Row(self.table, rid));
        }
        result
    }

    /// Overwrites a row. In place when the new payload fits the slot's
    /// reserved span; otherwise the row moves and the new RID is returned
    /// (the caller maintains indexes).
    pub fn update(&self, txn: &mut Transaction, rid: Rid, bytes: &[u8]) -> DbResult<Rid> {
        self.locks.lock_table(txn, LockMode::Ix, self.table)?;
        self.locks.lock_row(txn, LockMode::X, self.table, rid)?;

        let mut guard = self.pool.fetch_write(rid.page_id)?;
        let mut page = TablePage::new(&mut guard);
        if !page.view().is_live(rid.slot) {
            return Err(DbError::NotFound(format!("update of dead row {rid}")));
        }
        let old = page.view().tuple_bytes(rid.slot)?.to_vec();

        if page.update_in_place(rid.slot, bytes)? {
            let lsn = self.log.append(
                txn.id(),
                txn.last_lsn(),
                LogPayload::Update {
                    table: self.table,
                    rid,
                    old: old.clone(),
                    new: bytes.to_vec(),
                },
            )?;
            txn.set_last_lsn(lsn);
            guard.set_lsn(lsn);
            txn.push_undo(UndoRecord::Update {
                table: self.table,
                rid,
                old,
            });
            return Ok(rid);
        }

        // Does not fit: two-phase delete here, reinsert elsewhere.
        page.mark_delete(rid.slot)?;
        let lsn = self.log.append(
            txn.id(),
            txn.last_lsn(),
            LogPayload::Delete {
                table: self.table,
                rid,
                old,
            },
        )?;
        txn.set_last_lsn(lsn);
        guard.set_lsn(lsn);
        txn.push_undo(UndoRecord::Delete {
            table: self.table,
            rid,
        });
        drop(guard);

        self.insert(txn, bytes)
    }

    /// First delete phase; returns the before-image for index maintenance.
    pub fn mark_delete(&self, txn: &mut Transaction, rid: Rid) -> DbResult<Vec<u8>> {
        self.locks.lock_table(txn, LockMode::Ix, self.table)?;
        self.locks.lock_row(txn, LockMode::X, self.table, rid)?;

        let mut guard = self.pool.fetch_write(rid.page_id)?;
        let mut page = TablePage::new(&mut guard);
        if !page.view().is_live(rid.slot) {
            return Err(DbError::NotFound(format!("delete of dead row {rid}")));
        }
        let old = page.view().tuple_bytes(rid.slot)?.to_vec();
        page.mark_delete(rid.slot)?;
        let lsn = self.log.append(
            txn.id(),
            txn.last_lsn(),
            LogPayload::Delete {
                table: self.table,
                rid,
                old: old.clone(),
            },
        )?;
        txn.set_last_lsn(lsn);
        guard.set_lsn(lsn);
        txn.push_undo(UndoRecord::Delete {
            table: self.table,
            rid,
        });
        Ok(old)
    }

    /// Commit path: turn a marked row into a tombstone.
    pub fn apply_delete(&self, rid: Rid, lsn: Lsn) -> DbResult<()> {
        let mut guard = self.pool.fetch_write(rid.page_id)?;
        TablePage::new(&mut guard).apply_delete(rid.slot)?;
        guard.set_lsn(lsn);
        Ok(())
    }

    /// Abort path: make a marked row visible again.
    pub fn rollback_delete(&self, rid: Rid, lsn: Lsn) -> DbResult<()> {
        let mut guard = self.pool.fetch_write(rid.page_id)?;
        TablePage::new(&mut guard).rollback_delete(rid.slot)?;
        guard.set_lsn(lsn);
        Ok(())
    }

    /// Abort path: remove an uncommitted insert.
    pub fn remove_tuple(&self, rid: Rid, lsn: Lsn) -> DbResult<()> {
        let mut guard = self.pool.fetch_write(rid.page_id)?;
        TablePage::new(&mut guard).apply_delete(rid.slot)?;
        guard.set_lsn(lsn);
        Ok(())
    }

    /// Abort path: restore the before-image of an in-place update.
    pub fn restore_tuple(&self, rid: Rid, bytes: &[u8], lsn: Lsn) -> DbResult<()> {
        let mut guard = self.pool.fetch_write(rid.page_id)?;
        TablePage::new(&mut guard).restore_in_place(rid.slot, bytes)?;
        guard.set_lsn(lsn);
        Ok(())
    }

    /// Reads a row's current bytes regardless of its delete mark; the
    /// abort path uses this for compensation images and index fixups.
    pub fn current_bytes(&self, rid: Rid) -> DbResult<Vec<u8>> {
        let guard = self.pool.fetch_read(rid.page_id)?;
        Ok(TablePageView::new(&guard).tuple_bytes(rid.slot)?.to_vec())
    }

    /// Starts a physical-order scan. The table intent lock is taken here;
    /// row visibility is settled per row in `scan_next`.
    pub fn begin_scan(&self, txn: &Transaction) -> DbResult<ScanCursor> {
        self.locks.lock_table(txn, LockMode::Is, self.table)?;
        Ok(ScanCursor {
            page: self.first_page,
            next_slot: 0,
        })
    }

    /// Produces the next visible row, or `None` at end of table.
    ///
    /// Rows written by other transactions are settled by acquiring their S
    /// lock (blocking until the writer finishes); the lock is dropped
    /// immediately under READ_COMMITTED and kept under REPEATABLE_READ.
    pub fn scan_next(
        &self,
        txn: &mut Transaction,
        cursor: &mut ScanCursor,
    ) -> DbResult<Option<(Rid, Vec<u8>)>> {
        enum Step {
            Yield(Rid, Vec<u8>),
            Settle(Rid),
            Advance(PageId),
        }

        loop {
            if !cursor.page.is_valid() {
                return Ok(None);
            }

            let step = {
                let guard = self.pool.fetch_read(cursor.page)?;
                let view = TablePageView::new(&guard);
                let count = view.tuple_count();
                let mut step = None;
                while cursor.next_slot < count {
                    let slot = cursor.next_slot;
                    let rid = Rid::new(cursor.page, slot);
                    if view.is_tombstone(slot) {
                        cursor.next_slot += 1;
                        continue;
                    }
                    if self.holds_x(txn, rid) {
                        // Our own write: marked rows are our deletes.
                        if view.is_delete_marked(slot) {
                            cursor.next_slot += 1;
                            continue;
                        }
                        cursor.next_slot += 1;
                        step = Some(Step::Yield(rid, view.tuple_bytes(slot)?.to_vec()));
                        break;
                    }
                    // Another transaction may be mid-write: settle below,
                    // without the page latch held.
                    step = Some(Step::Settle(rid));
                    break;
                }
                step.unwrap_or(Step::Advance(view.next()))
            };

            match step {
                Step::Yield(rid, bytes) => return Ok(Some((rid, bytes))),
                Step::Advance(next) => {
                    cursor.page = next;
                    cursor.next_slot = 0;
                }
                Step::Settle(rid) => {
                    self.locks.lock_row(txn, LockMode::S, self.table, rid)?;
                    let visible = self.read_live(rid).ok();
                    cursor.next_slot = rid.slot + 1;
                    match visible {
                        Some(bytes) => {
                            if txn.isolation() == IsolationLevel::ReadCommitted {
                                self.locks
                                    .unlock(txn.id(), LockResource::Row(self.table, rid));
                            }
                            return Ok(Some((rid, bytes)));
                        }
                        None => {
                            // The writer deleted it and committed.
                            self.locks
                                .unlock(txn.id(), LockResource::Row(self.table, rid));
                        }
                    }
                }
            }
        }
    }

    fn holds_x(&self, txn: &Transaction, rid: Rid) -> bool {
        self.locks
            .holding(txn.id(), LockResource::Row(self.table, rid))
            == Some(LockMode::X)
    }

    fn read_live(&self, rid: Rid) -> DbResult<Vec<u8>> {
        let guard = self.pool.fetch_read(rid.page_id)?;
        let view = TablePageView::new(&guard);
        if !view.is_live(rid.slot) {
            return Err(DbError::NotFound(format!("row {rid} is not visible")));
        }
        Ok(view.tuple_bytes(rid.slot)?.to_vec())
    }
}

#[cfg(test)]
mod tests;
