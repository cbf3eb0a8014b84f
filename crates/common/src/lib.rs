#[cfg(test)]
mod tests;

mod schema;
mod tuple;

pub use schema::{Column, Schema};
pub use tuple::Tuple;

use serde::{Deserialize, Serialize};
use std::{fmt, io, sync::Arc, time::Duration};
use thiserror::Error;

/// Fixed page size for the data file; page formats assume this exactly.
pub const PAGE_SIZE: usize = 4096;

/// Page id reserved for the catalog.
pub const CATALOG_PAGE_ID: PageId = PageId(0);

/// Logical identifier for a page in the database file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    pub const INVALID: PageId = PageId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identifier: page plus slot. Stable for the lifetime of the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u16,
}

impl Rid {
    pub const INVALID: Rid = Rid {
        page_id: PageId::INVALID,
        slot: u16::MAX,
    };

    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Monotone log sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Sorts before every real LSN; pages that were never logged carry it.
    pub const ZERO: Lsn = Lsn(0);
}

/// Transaction identifier; allocation order doubles as transaction age.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u32);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog object id for a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableOid(pub u32);

/// Catalog object id for an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexOid(pub u32);

/// Canonical error type shared across the engine.
///
/// The kinds are a closed set; the facade maps them onto `QueryResult`
/// failures, and `exit_code` maps them for a CLI host.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("syntax: {0}")]
    Syntax(String),
    #[error("semantic: {0}")]
    Semantic(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("out of resources: {0}")]
    OutOfResources(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl DbError {
    /// Whether this error aborts the enclosing transaction;
    /// statement-scoped kinds leave the transaction alive.
    pub fn aborts_txn(&self) -> bool {
        matches!(
            self,
            DbError::Constraint(_)
                | DbError::Conflict(_)
                | DbError::Serialization(_)
                | DbError::Timeout(_)
                | DbError::Corruption(_)
                | DbError::Internal(_)
        )
    }

    /// Exit code for a CLI host: 1 parse/exec, 2 I/O, 3 recovery.
    pub fn exit_code(&self) -> i32 {
        match self {
            DbError::Io(_) => 2,
            DbError::Corruption(_) => 3,
            _ => 1,
        }
    }
}

/// Result alias carrying a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Hook applied to numeric aggregate outputs; the differential-privacy
/// collaborator plugs in here.
pub type NoiseFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Cooperative statement-level cancellation flag. Long-running operators
/// check it at every `next()` boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// `Timeout` if the statement has been cancelled.
    pub fn check(&self) -> DbResult<()> {
        if self.is_cancelled() {
            return Err(DbError::Timeout("statement cancelled".into()));
        }
        Ok(())
    }
}

/// Interface the buffer pool uses to honor the WAL rule without depending
/// on the log manager: the log must be durable up to a page's LSN before
/// that page reaches disk.
pub trait WalSync: Send + Sync {
    fn durable_lsn(&self) -> Lsn;
    fn flush_to(&self, lsn: Lsn) -> DbResult<()>;
}

/// Runtime configuration for the engine.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder().pool_size(64).wal_enabled(true).build();
/// assert_eq!(config.pool_size, 64);
/// ```
#[derive(Clone, bon::Builder)]
pub struct Config {
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 256)]
    pub pool_size: usize,
    /// How long a lock request waits before failing with `Timeout`.
    #[builder(default = Duration::from_secs(5))]
    pub lock_timeout: Duration,
    /// Period of the background wait-for-graph cycle check.
    #[builder(default = Duration::from_millis(50))]
    pub deadlock_interval: Duration,
    /// Controls whether mutations are logged and recovery runs at open.
    #[builder(default = true)]
    pub wal_enabled: bool,
    /// Optional noise applied to numeric aggregate outputs.
    pub noise: Option<NoiseFn>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 256,
            lock_timeout: Duration::from_secs(5),
            deadlock_interval: Duration::from_millis(50),
            wal_enabled: true,
            noise: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pool_size", &self.pool_size)
            .field("lock_timeout", &self.lock_timeout)
            .field("deadlock_interval", &self.deadlock_interval)
            .field("wal_enabled", &self.wal_enabled)
            .field("noise", &self.noise.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
