use common::{DbError, DbResult, Lsn, Tuple, TxnId};
use executor::Runtime;
use hashbrown::HashSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use txn::{IsolationLevel, Transaction, TxnState, UndoRecord};
use types::Value;
use wal::{Compensation, LogPayload};

/// Transaction lifecycle: begin, commit (flush-then-acknowledge), and
/// abort (reverse undo walk writing compensation records).
pub struct TransactionManager {
    runtime: Arc<Runtime>,
    next_txn_id: AtomicU32,
    active: Mutex<HashSet<TxnId>>,
}

impl TransactionManager {
    pub fn new(runtime: Arc<Runtime>, first_txn_id: u32) -> Self {
        Self {
            runtime,
            next_txn_id: AtomicU32::new(first_txn_id.max(1)),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn begin(&self, isolation: IsolationLevel) -> DbResult<Transaction> {
        let id = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let mut txn = Transaction::new(id, isolation);
        let lsn = self
            .runtime
            .log
            .append(id, Lsn::ZERO, LogPayload::Begin)?;
        txn.set_last_lsn(lsn);
        self.active.lock().insert(id);
        tracing::debug!(txn = id.0, ?isolation, "begin");
        Ok(txn)
    }

    /// Transaction ids currently between begin and commit/abort.
    pub fn active_txns(&self) -> Vec<TxnId> {
        self.active.lock().iter().copied().collect()
    }

    /// Commit: append and flush the commit record, finalize two-phase
    /// deletes, release locks. The commit is acknowledged only after the
    /// log is durable through the commit LSN.
    pub fn commit(&self, txn: &mut Transaction) -> DbResult<()> {
        if !txn.is_active() {
            return Err(DbError::Internal(format!(
                "commit of finished transaction {}",
                txn.id()
            )));
        }
        let commit_lsn = self
            .runtime
            .log
            .append(txn.id(), txn.last_lsn(), LogPayload::Commit)?;
        txn.set_last_lsn(commit_lsn);

        for undo in txn.undo_log() {
            if let UndoRecord::Delete { table, rid } = undo {
                self.runtime.heap(*table)?.apply_delete(*rid, commit_lsn)?;
            }
        }

        self.runtime.log.flush_to(commit_lsn)?;
        txn.set_state(TxnState::Shrinking);
        self.runtime.locks.release_all(txn.id());
        txn.set_state(TxnState::Committed);
        txn.take_undo_log();
        self.active.lock().remove(&txn.id());
        tracing::debug!(txn = txn.id().0, lsn = commit_lsn.0, "commit");
        Ok(())
    }

    /// Abort: walk the undo log newest-first, apply each inverse action,
    /// and log a CLR for it; then release locks.
    pub fn abort(&self, txn: &mut Transaction) -> DbResult<()> {
        if !txn.is_active() {
            return Err(DbError::Internal(format!(
                "abort of finished transaction {}",
                txn.id()
            )));
        }
        let undo_log = txn.take_undo_log();
        for record in undo_log.into_iter().rev() {
            match record {
                UndoRecord::Insert { table, rid } => {
                    let heap = self.runtime.heap(table)?;
                    let meta = self.runtime.catalog.get_table_by_oid(table)?;
                    let bytes = heap.current_bytes(rid)?;
                    let tuple = Tuple::deserialize(&bytes, &meta.schema)?;
                    for (imeta, tree) in self.runtime.table_indexes(table)? {
                        tree.delete(&project(&tuple.values, &imeta.key_attrs), rid)?;
                    }
                    let lsn = self.runtime.log.append(
                        txn.id(),
                        txn.last_lsn(),
                        LogPayload::Clr {
                            undo_next: Lsn::ZERO,
                            action: Compensation::Remove { table, rid },
                        },
                    )?;
                    txn.set_last_lsn(lsn);
                    heap.remove_tuple(rid, lsn)?;
                }
                UndoRecord::Delete { table, rid } => {
                    let heap = self.runtime.heap(table)?;
                    let meta = self.runtime.catalog.get_table_by_oid(table)?;
                    let bytes = heap.current_bytes(rid)?;
                    let lsn = self.runtime.log.append(
                        txn.id(),
                        txn.last_lsn(),
                        LogPayload::Clr {
                            undo_next: Lsn::ZERO,
                            action: Compensation::Reinsert {
                                table,
                                rid,
                                tuple: bytes.clone(),
                            },
                        },
                    )?;
                    txn.set_last_lsn(lsn);
                    heap.rollback_delete(rid, lsn)?;
                    let tuple = Tuple::deserialize(&bytes, &meta.schema)?;
                    for (imeta, tree) in self.runtime.table_indexes(table)? {
                        tree.insert(&project(&tuple.values, &imeta.key_attrs), rid)?;
                    }
                }
                UndoRecord::Update { table, rid, old } => {
                    let heap = self.runtime.heap(table)?;
                    let meta = self.runtime.catalog.get_table_by_oid(table)?;
                    let current = heap.current_bytes(rid)?;
                    let lsn = self.runtime.log.append(
                        txn.id(),
                        txn.last_lsn(),
                        LogPayload::Clr {
                            undo_next: Lsn::ZERO,
                            action: Compensation::Restore {
                                table,
                                rid,
                                tuple: old.clone(),
                            },
                        },
                    )?;
                    txn.set_last_lsn(lsn);
                    heap.restore_tuple(rid, &old, lsn)?;

                    let new_tuple = Tuple::deserialize(&current, &meta.schema)?;
                    let old_tuple = Tuple::deserialize(&old, &meta.schema)?;
                    for (imeta, tree) in self.runtime.table_indexes(table)? {
                        let new_key = project(&new_tuple.values, &imeta.key_attrs);
                        let old_key = project(&old_tuple.values, &imeta.key_attrs);
                        if new_key != old_key {
                            tree.delete(&new_key, rid)?;
                            tree.insert(&old_key, rid)?;
                        }
                    }
                }
            }
        }

        let lsn = self
            .runtime
            .log
            .append(txn.id(), txn.last_lsn(), LogPayload::Abort)?;
        txn.set_last_lsn(lsn);
        txn.set_state(TxnState::Shrinking);
        self.runtime.locks.release_all(txn.id());
        txn.set_state(TxnState::Aborted);
        self.active.lock().remove(&txn.id());
        tracing::debug!(txn = txn.id().0, "abort");
        Ok(())
    }
}

fn project(values: &[Value], attrs: &[usize]) -> Vec<Value> {
    attrs.iter().map(|&i| values[i].clone()).collect()
}
