use common::{Lsn, Rid, TableOid, TxnId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read locks are released right after each read.
    ReadCommitted,
    /// Read locks are held to commit; repeated reads are stable.
    RepeatableRead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// What it takes to roll one mutation back, recorded in execution order.
#[derive(Clone, Debug, PartialEq)]
pub enum UndoRecord {
    /// Row inserted at `rid`; undo removes it.
    Insert { table: TableOid, rid: Rid },
    /// Row delete-marked at `rid`; undo clears the mark.
    Delete { table: TableOid, rid: Rid },
    /// Row overwritten in place; undo restores the before-image bytes.
    Update {
        table: TableOid,
        rid: Rid,
        old: Vec<u8>,
    },
}

/// One client transaction. Mutated only by its owning session thread; the
/// lock manager tracks cross-transaction state under its own latch.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    isolation: IsolationLevel,
    state: TxnState,
    last_lsn: Lsn,
    undo_log: Vec<UndoRecord>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            state: TxnState::Growing,
            last_lsn: Lsn::ZERO,
            undo_log: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn set_state(&mut self, state: TxnState) {
        self.state = state;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TxnState::Growing | TxnState::Shrinking)
    }

    /// Head of this transaction's prev_lsn chain in the log.
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    pub fn set_last_lsn(&mut self, lsn: Lsn) {
        self.last_lsn = lsn;
    }

    pub fn push_undo(&mut self, record: UndoRecord) {
        self.undo_log.push(record);
    }

    pub fn undo_log(&self) -> &[UndoRecord] {
        &self.undo_log
    }

    /// Drains the undo log for the abort walk (newest first).
    pub fn take_undo_log(&mut self) -> Vec<UndoRecord> {
        std::mem::take(&mut self.undo_log)
    }
}
