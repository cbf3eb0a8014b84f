//! Transactions and the lock manager.
//!
//! Locking is hierarchical two-phase: intent modes at table granularity,
//! S/X at row granularity. Waiters block on a condvar with a deadline; a
//! background sweep walks the wait-for graph and wakes the youngest
//! transaction of any cycle as a deadlock victim.

mod lock_manager;
mod transaction;

pub use lock_manager::{LockManager, LockMode, LockResource};
pub use transaction::{IsolationLevel, Transaction, TxnState, UndoRecord};

#[cfg(test)]
mod tests;
