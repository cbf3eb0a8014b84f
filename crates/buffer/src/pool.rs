use crate::replacer::{FrameId, LruKReplacer};
use crate::LRUK_K;
use common::{DbError, DbResult, Lsn, PageId, WalSync, PAGE_SIZE};
use hashbrown::HashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use storage::DiskManager;

type FrameData = Box<[u8]>;
type FrameLock = Arc<RwLock<FrameData>>;

/// Fixed-size page cache over the disk manager.
///
/// Cheap to clone; all clones share the same frames. The management state
/// (page table, pin counts, replacer) sits behind one mutex; page bytes sit
/// behind per-frame reader-writer latches held by the returned guards.
///
/// Lock order is state mutex → frame latch. Guards never touch the state
/// mutex while holding their frame latch (the latch is released first on
/// drop), so the two levels cannot deadlock.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

struct Shared {
    disk: Arc<DiskManager>,
    frames: Vec<FrameLock>,
    state: Mutex<PoolState>,
    wal: Mutex<Option<Arc<dyn WalSync>>>,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    meta: Vec<FrameMeta>,
    replacer: LruKReplacer,
    free_list: Vec<FrameId>,
}

#[derive(Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
    lsn: Lsn,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: PageId::INVALID,
            pin_count: 0,
            dirty: false,
            lsn: Lsn::ZERO,
        }
    }
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool must have at least one frame");
        let frames = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())))
            .collect();
        Self {
            shared: Arc::new(Shared {
                disk,
                frames,
                state: Mutex::new(PoolState {
                    page_table: HashMap::new(),
                    meta: vec![FrameMeta::empty(); pool_size],
                    replacer: LruKReplacer::new(LRUK_K),
                    free_list: (0..pool_size).rev().collect(),
                }),
                wal: Mutex::new(None),
            }),
        }
    }

    /// Installs the log manager used to enforce the WAL rule on flush.
    pub fn set_wal(&self, wal: Arc<dyn WalSync>) {
        *self.shared.wal.lock() = Some(wal);
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.shared.disk
    }

    pub fn pool_size(&self) -> usize {
        self.shared.frames.len()
    }

    /// Sum of all pin counts; zero at steady state.
    pub fn total_pins(&self) -> u32 {
        let state = self.shared.state.lock();
        state.meta.iter().map(|m| m.pin_count).sum()
    }

    /// Fetches a page for reading; pins it for the guard's lifetime.
    pub fn fetch_read(&self, page_id: PageId) -> DbResult<PageReadGuard> {
        let (frame_id, lock) = self.pin_frame(page_id)?;
        Ok(PageReadGuard {
            shared: Arc::clone(&self.shared),
            frame_id,
            page_id,
            guard: Some(lock.read_arc()),
        })
    }

    /// Fetches a page for writing; any mutation marks the frame dirty.
    pub fn fetch_write(&self, page_id: PageId) -> DbResult<PageWriteGuard> {
        let (frame_id, lock) = self.pin_frame(page_id)?;
        Ok(PageWriteGuard {
            shared: Arc::clone(&self.shared),
            frame_id,
            page_id,
            dirty: false,
            lsn: None,
            guard: Some(lock.write_arc()),
        })
    }

    /// Allocates a fresh page on disk and returns it pinned and zeroed.
    pub fn new_page(&self) -> DbResult<PageWriteGuard> {
        let page_id = self.shared.disk.allocate_page()?;
        let mut state = self.shared.state.lock();
        let frame_id = self.take_frame(&mut state)?;
        {
            let mut data = self.shared.frames[frame_id].write();
            data.fill(0);
        }
        self.install(&mut state, frame_id, page_id);
        // New pages are dirty from birth so an untouched one still reaches
        // disk with its initialized header.
        state.meta[frame_id].dirty = true;
        drop(state);

        let lock = Arc::clone(&self.shared.frames[frame_id]);
        Ok(PageWriteGuard {
            shared: Arc::clone(&self.shared),
            frame_id,
            page_id,
            dirty: false,
            lsn: None,
            guard: Some(lock.write_arc()),
        })
    }

    /// Writes a resident page to disk (honoring the WAL rule) and clears
    /// its dirty bit. Unknown pages are a no-op.
    pub fn flush_page(&self, page_id: PageId) -> DbResult<()> {
        let mut state = self.shared.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(());
        };
        self.write_back(&mut state, frame_id)?;
        Ok(())
    }

    /// Flushes every dirty frame.
    pub fn flush_all(&self) -> DbResult<()> {
        let mut state = self.shared.state.lock();
        for frame_id in 0..self.shared.frames.len() {
            if state.meta[frame_id].dirty {
                self.write_back(&mut state, frame_id)?;
            }
        }
        Ok(())
    }

    fn pin_frame(&self, page_id: PageId) -> DbResult<(FrameId, FrameLock)> {
        let mut state = self.shared.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.meta[frame_id].pin_count += 1;
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok((frame_id, Arc::clone(&self.shared.frames[frame_id])));
        }

        let frame_id = self.take_frame(&mut state)?;
        {
            let mut data = self.shared.frames[frame_id].write();
            if let Err(err) = self.shared.disk.read_page(page_id, &mut data) {
                state.free_list.push(frame_id);
                return Err(err);
            }
        }
        self.install(&mut state, frame_id, page_id);
        Ok((frame_id, Arc::clone(&self.shared.frames[frame_id])))
    }

    /// Claims a frame from the free list or by evicting a victim.
    /// Fails with `OutOfResources` when every frame is pinned.
    fn take_frame(&self, state: &mut PoolState) -> DbResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }
        let Some(frame_id) = state.replacer.evict() else {
            return Err(DbError::OutOfResources(
                "buffer pool exhausted: every frame is pinned".into(),
            ));
        };
        let meta = state.meta[frame_id];
        debug_assert_eq!(meta.pin_count, 0);
        if meta.dirty {
            self.write_back(state, frame_id)?;
        }
        state.page_table.remove(&meta.page_id);
        state.meta[frame_id] = FrameMeta::empty();
        tracing::trace!(page = meta.page_id.0, frame = frame_id, "evicted page");
        Ok(frame_id)
    }

    fn install(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId) {
        state.meta[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            dirty: false,
            lsn: Lsn::ZERO,
        };
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
    }

    /// WAL rule, then disk write, then clear dirty.
    fn write_back(&self, state: &mut PoolState, frame_id: FrameId) -> DbResult<()> {
        let meta = state.meta[frame_id];
        if !meta.dirty {
            return Ok(());
        }
        if meta.lsn > Lsn::ZERO {
            let wal = self.shared.wal.lock().clone();
            if let Some(wal) = wal {
                if wal.durable_lsn() < meta.lsn {
                    wal.flush_to(meta.lsn)?;
                }
            }
        }
        let data = self.shared.frames[frame_id].read();
        self.shared.disk.write_page(meta.page_id, &data)?;
        drop(data);
        state.meta[frame_id].dirty = false;
        Ok(())
    }
}

fn unpin(shared: &Shared, frame_id: FrameId, dirty: bool, lsn: Option<Lsn>) {
    let mut state = shared.state.lock();
    let pins_left = {
        let meta = &mut state.meta[frame_id];
        meta.dirty |= dirty;
        if let Some(lsn) = lsn {
            meta.lsn = meta.lsn.max(lsn);
        }
        debug_assert!(meta.pin_count > 0, "unpin without a pin");
        meta.pin_count = meta.pin_count.saturating_sub(1);
        meta.pin_count
    };
    if pins_left == 0 {
        state.replacer.set_evictable(frame_id, true);
    }
}

/// Shared (read) access to a pinned page.
pub struct PageReadGuard {
    shared: Arc<Shared>,
    frame_id: FrameId,
    page_id: PageId,
    guard: Option<ArcRwLockReadGuard<RawRwLock, FrameData>>,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl std::fmt::Debug for PageReadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("page_id", &self.page_id)
            .finish()
    }
}

impl Deref for PageReadGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_ref().unwrap()
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        // Latch first, pin second; see the lock-order note on BufferPool.
        self.guard.take();
        unpin(&self.shared, self.frame_id, false, None);
    }
}

/// Exclusive access to a pinned page. The first mutable dereference marks
/// the frame dirty; `set_lsn` records the latest log record covering the
/// page so eviction can enforce the WAL rule.
pub struct PageWriteGuard {
    shared: Arc<Shared>,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
    lsn: Option<Lsn>,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, FrameData>>,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.dirty = true;
        self.lsn = Some(self.lsn.map_or(lsn, |cur| cur.max(lsn)));
    }
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .field("lsn", &self.lsn)
            .finish()
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_ref().unwrap()
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        self.guard.as_mut().unwrap()
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.guard.take();
        unpin(&self.shared, self.frame_id, self.dirty, self.lsn);
    }
}
