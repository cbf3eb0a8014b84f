//! Buffer pool: a fixed set of in-memory frames caching database pages,
//! with LRU-K replacement and RAII pin guards.
//!
//! Callers fetch pages through [`BufferPool::fetch_read`] /
//! [`BufferPool::fetch_write`] and receive a guard that owns one pin and
//! the frame latch; dropping the guard releases both. A frame whose pin
//! count is non-zero is never chosen as an eviction victim, and a dirty
//! victim is written out (after the WAL has been flushed up to the page's
//! LSN) before its frame is reused.

mod pool;
mod replacer;

pub use pool::{BufferPool, PageReadGuard, PageWriteGuard};
pub use replacer::{FrameId, LruKReplacer};

/// Backward distance horizon for the replacement policy.
pub const LRUK_K: usize = 2;
