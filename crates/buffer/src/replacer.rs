use hashbrown::HashMap;
use std::collections::VecDeque;

pub type FrameId = usize;

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward K-distance:
/// frames with fewer than K recorded accesses count as infinite distance
/// and are preferred, tie-broken by their oldest access. Among frames with
/// a full history the one whose K-th most recent access is oldest wins.
pub struct LruKReplacer {
    k: usize,
    tick: u64,
    frames: HashMap<FrameId, FrameHistory>,
}

struct FrameHistory {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            tick: 0,
            frames: HashMap::new(),
        }
    }

    /// Records an access at the current logical tick.
    pub fn record_access(&mut self, frame: FrameId) {
        let tick = self.tick;
        self.tick += 1;
        let entry = self.frames.entry(frame).or_insert_with(|| FrameHistory {
            history: VecDeque::new(),
            evictable: false,
        });
        entry.history.push_back(tick);
        if entry.history.len() > self.k {
            entry.history.pop_front();
        }
    }

    /// Pin (`false`) or unpin (`true`) a frame for victim selection.
    pub fn set_evictable(&mut self, frame: FrameId, evictable: bool) {
        if let Some(entry) = self.frames.get_mut(&frame) {
            entry.evictable = evictable;
        }
    }

    /// Drops a frame's history entirely (frame freed).
    pub fn remove(&mut self, frame: FrameId) {
        self.frames.remove(&frame);
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.frames.values().filter(|f| f.evictable).count()
    }

    /// Selects and removes the victim frame, if any frame is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;

        for (&frame, entry) in &self.frames {
            if !entry.evictable {
                continue;
            }
            let infinite = entry.history.len() < self.k;
            // For infinite-distance frames the tiebreaker is the oldest
            // single access; otherwise the K-th most recent access.
            let key = if infinite {
                entry.history.front().copied().unwrap_or(0)
            } else {
                *entry.history.front().unwrap()
            };
            let better = match victim {
                None => true,
                Some((_, v_inf, v_key)) => match (infinite, v_inf) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => key < v_key,
                },
            };
            if better {
                victim = Some((frame, infinite, key));
            }
        }

        let (frame, _, _) = victim?;
        self.frames.remove(&frame);
        Some(frame)
    }
}
