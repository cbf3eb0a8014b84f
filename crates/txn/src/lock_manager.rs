use crate::Transaction;
use common::{DbError, DbResult, Rid, TableOid, TxnId};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Hierarchical lock modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Intention shared (table only).
    Is,
    /// Intention exclusive (table only).
    Ix,
    S,
    /// Shared plus intention exclusive (table only).
    Six,
    X,
}

/// Lockable resources at the two granularities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockResource {
    Table(TableOid),
    Row(TableOid, Rid),
}

fn compatible(a: LockMode, b: LockMode) -> bool {
    use LockMode::*;
    match (a, b) {
        (Is, X) | (X, Is) => false,
        (Is, _) | (_, Is) => true,
        (Ix, Ix) => true,
        (Ix, _) | (_, Ix) => false,
        (S, S) => true,
        _ => false,
    }
}

/// Whether an already-held mode subsumes a new request.
fn covers(held: LockMode, req: LockMode) -> bool {
    use LockMode::*;
    match (held, req) {
        (a, b) if a == b => true,
        (X, _) => true,
        (Six, S | Ix | Is) => true,
        (S, Is) | (Ix, Is) => true,
        _ => false,
    }
}

/// Mode resulting from an upgrade request on a held lock.
fn upgraded(held: LockMode, req: LockMode) -> LockMode {
    use LockMode::*;
    if covers(req, held) {
        req
    } else {
        match (held, req) {
            (S, Ix) | (Ix, S) => Six,
            _ => req,
        }
    }
}

/// Table and row locks with blocking acquisition, lock-wait timeouts, and
/// background deadlock detection over the wait-for graph.
pub struct LockManager {
    inner: Mutex<Inner>,
    cv: Condvar,
    timeout: Duration,
}

#[derive(Default)]
struct Inner {
    granted: HashMap<LockResource, HashMap<TxnId, LockMode>>,
    held: HashMap<TxnId, HashSet<LockResource>>,
    waits_for: HashMap<TxnId, HashSet<TxnId>>,
    victims: HashSet<TxnId>,
}

impl LockManager {
    /// Creates the manager and starts the deadlock sweep, which runs until
    /// the last `Arc` is dropped.
    pub fn start(timeout: Duration, deadlock_interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            cv: Condvar::new(),
            timeout,
        });
        let weak: Weak<LockManager> = Arc::downgrade(&manager);
        std::thread::Builder::new()
            .name("deadlock-detector".into())
            .spawn(move || loop {
                std::thread::sleep(deadlock_interval);
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                manager.run_deadlock_check();
            })
            .expect("spawn deadlock detector");
        manager
    }

    pub fn lock_table(&self, txn: &Transaction, mode: LockMode, table: TableOid) -> DbResult<()> {
        self.lock(txn, LockResource::Table(table), mode)
    }

    /// Row locks are S or X and require the matching table intent lock.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        table: TableOid,
        rid: Rid,
    ) -> DbResult<()> {
        let table_mode = self.holding(txn.id(), LockResource::Table(table));
        let intent_ok = match mode {
            LockMode::S => table_mode.is_some(),
            LockMode::X => matches!(
                table_mode,
                Some(LockMode::Ix) | Some(LockMode::Six) | Some(LockMode::X)
            ),
            _ => {
                return Err(DbError::Internal(format!(
                    "intent mode {mode:?} requested on a row"
                )))
            }
        };
        if !intent_ok {
            return Err(DbError::Internal(format!(
                "row lock on table {} without intent lock",
                table.0
            )));
        }
        self.lock(txn, LockResource::Row(table, rid), mode)
    }

    pub fn lock(&self, txn: &Transaction, resource: LockResource, mode: LockMode) -> DbResult<()> {
        if !txn.is_active() {
            return Err(DbError::Internal(format!(
                "lock request from finished transaction {}",
                txn.id()
            )));
        }
        let txn_id = txn.id();
        let deadline = Instant::now() + self.timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.victims.remove(&txn_id) {
                inner.waits_for.remove(&txn_id);
                tracing::debug!(txn = txn_id.0, "aborting deadlock victim");
                return Err(DbError::Conflict(format!(
                    "transaction {txn_id} chosen as deadlock victim"
                )));
            }

            let held = inner
                .granted
                .get(&resource)
                .and_then(|holders| holders.get(&txn_id))
                .copied();
            let requested = match held {
                Some(held) if covers(held, mode) => {
                    inner.waits_for.remove(&txn_id);
                    return Ok(());
                }
                Some(held) => upgraded(held, mode),
                None => mode,
            };

            let conflicts: HashSet<TxnId> = inner
                .granted
                .get(&resource)
                .map(|holders| {
                    holders
                        .iter()
                        .filter(|(&id, &held)| id != txn_id && !compatible(held, requested))
                        .map(|(&id, _)| id)
                        .collect()
                })
                .unwrap_or_default();

            if conflicts.is_empty() {
                inner
                    .granted
                    .entry(resource)
                    .or_default()
                    .insert(txn_id, requested);
                inner.held.entry(txn_id).or_default().insert(resource);
                inner.waits_for.remove(&txn_id);
                return Ok(());
            }

            inner.waits_for.insert(txn_id, conflicts);
            if self.cv.wait_until(&mut inner, deadline).timed_out() {
                inner.waits_for.remove(&txn_id);
                return Err(DbError::Timeout(format!(
                    "transaction {txn_id} timed out waiting for {resource:?}"
                )));
            }
        }
    }

    /// Releases one lock (the read-committed early release path).
    pub fn unlock(&self, txn_id: TxnId, resource: LockResource) {
        let mut inner = self.inner.lock();
        drop_grant(&mut inner, txn_id, resource);
        if let Some(held) = inner.held.get_mut(&txn_id) {
            held.remove(&resource);
        }
        self.cv.notify_all();
    }

    /// Releases everything a transaction holds (commit and abort).
    pub fn release_all(&self, txn_id: TxnId) {
        let mut inner = self.inner.lock();
        if let Some(resources) = inner.held.remove(&txn_id) {
            for resource in resources {
                drop_grant(&mut inner, txn_id, resource);
            }
        }
        inner.waits_for.remove(&txn_id);
        inner.victims.remove(&txn_id);
        self.cv.notify_all();
    }

    /// The mode `txn_id` currently holds on `resource`, if any.
    pub fn holding(&self, txn_id: TxnId, resource: LockResource) -> Option<LockMode> {
        self.inner
            .lock()
            .granted
            .get(&resource)
            .and_then(|holders| holders.get(&txn_id))
            .copied()
    }

    /// One sweep of the wait-for graph; exposed for deterministic tests.
    pub fn run_deadlock_check(&self) {
        let mut inner = self.inner.lock();
        let victims = find_cycle_victims(&inner.waits_for);
        if victims.is_empty() {
            return;
        }
        for victim in victims {
            tracing::warn!(txn = victim.0, "deadlock detected; waking victim");
            inner.victims.insert(victim);
        }
        self.cv.notify_all();
    }
}

fn drop_grant(inner: &mut Inner, txn_id: TxnId, resource: LockResource) {
    let emptied = match inner.granted.get_mut(&resource) {
        Some(holders) => {
            holders.remove(&txn_id);
            holders.is_empty()
        }
        None => false,
    };
    if emptied {
        inner.granted.remove(&resource);
    }
}

/// Finds cycles in the wait-for graph and returns the youngest transaction
/// (largest id) of each as the victim.
fn find_cycle_victims(waits_for: &HashMap<TxnId, HashSet<TxnId>>) -> Vec<TxnId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    fn visit(
        node: TxnId,
        waits_for: &HashMap<TxnId, HashSet<TxnId>>,
        colors: &mut HashMap<TxnId, Color>,
        stack: &mut Vec<TxnId>,
        victims: &mut Vec<TxnId>,
    ) {
        colors.insert(node, Color::Grey);
        stack.push(node);
        if let Some(edges) = waits_for.get(&node) {
            let mut targets: Vec<TxnId> = edges.iter().copied().collect();
            targets.sort();
            for next in targets {
                match colors.get(&next).copied().unwrap_or(Color::White) {
                    Color::White => visit(next, waits_for, colors, stack, victims),
                    Color::Grey => {
                        // Back edge: everything from `next` on the stack is
                        // in the cycle.
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        if let Some(&victim) = stack[start..].iter().max() {
                            if !victims.contains(&victim) {
                                victims.push(victim);
                            }
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        stack.pop();
        colors.insert(node, Color::Black);
    }

    let mut colors = HashMap::new();
    let mut victims = Vec::new();
    let mut nodes: Vec<TxnId> = waits_for.keys().copied().collect();
    nodes.sort();
    for node in nodes {
        if colors.get(&node).copied().unwrap_or(Color::White) == Color::White {
            let mut stack = Vec::new();
            visit(node, waits_for, &mut colors, &mut stack, &mut victims);
        }
    }
    victims
}
