//! B+Tree index over buffer-pool pages.
//!
//! Keys are fixed-width byte strings from [`KeyCodec`], made unique by an
//! appended RID suffix. Concurrency uses latch coupling on the page
//! guards: readers take S latches and release the parent after latching
//! the child; writers descend with X latches and release all ancestors
//! (and the root-pointer latch) once they pass a node that cannot split
//! or underflow. Structural changes therefore always hold the latches of
//! every node they touch.

mod key;
mod node;

pub use key::KeyCodec;

use buffer::{BufferPool, PageReadGuard, PageWriteGuard};
use common::{DbError, DbResult, IndexOid, PageId, Rid};
use node::{InternalNode, LeafNode, Node, RID_SUFFIX};
use types::Value;

fn root_of(data: &[u8]) -> PageId {
    PageId(u32::from_le_bytes(data[..4].try_into().unwrap()))
}

fn set_root(data: &mut [u8], root: PageId) {
    data[..4].copy_from_slice(&root.0.to_le_bytes());
}

/// One persistent B+Tree. The meta page holds the root pointer so the
/// root can move without touching the catalog.
pub struct BPlusTree {
    index: IndexOid,
    meta_page: PageId,
    codec: KeyCodec,
    full_key_size: usize,
    leaf_cap: usize,
    internal_cap: usize,
    min_leaf: usize,
    min_internal: usize,
    pool: BufferPool,
}

impl BPlusTree {
    /// Allocates the meta page and an empty root leaf.
    pub fn create(pool: BufferPool, index: IndexOid, codec: KeyCodec) -> DbResult<Self> {
        let mut meta_guard = pool.new_page()?;
        let meta_page = meta_guard.page_id();
        let mut leaf_guard = pool.new_page()?;
        let full_key_size = codec.key_size() + RID_SUFFIX;
        Node::empty_leaf().write(&mut leaf_guard, full_key_size);
        set_root(&mut meta_guard, leaf_guard.page_id());
        drop(leaf_guard);
        drop(meta_guard);
        Ok(Self::open(pool, index, codec, meta_page))
    }

    /// Opens an existing tree rooted through `meta_page`.
    pub fn open(pool: BufferPool, index: IndexOid, codec: KeyCodec, meta_page: PageId) -> Self {
        let full_key_size = codec.key_size() + RID_SUFFIX;
        let leaf_cap = node::leaf_capacity(full_key_size).max(3);
        let internal_cap = node::internal_capacity(full_key_size).max(3);
        Self {
            index,
            meta_page,
            codec,
            full_key_size,
            leaf_cap,
            internal_cap,
            min_leaf: leaf_cap / 2,
            min_internal: internal_cap / 2,
            pool,
        }
    }

    pub fn index_oid(&self) -> IndexOid {
        self.index
    }

    pub fn meta_page(&self) -> PageId {
        self.meta_page
    }

    fn read_node(&self, data: &[u8]) -> DbResult<Node> {
        Node::read(data, self.full_key_size)
            .ok_or_else(|| DbError::Corruption("unrecognized b+tree node kind".into()))
    }

    fn insert_safe(&self, node: &Node) -> bool {
        match node {
            Node::Leaf(leaf) => leaf.entries.len() < self.leaf_cap,
            Node::Internal(internal) => internal.keys.len() < self.internal_cap,
        }
    }

    fn delete_safe(&self, node: &Node) -> bool {
        match node {
            Node::Leaf(leaf) => leaf.entries.len() > self.min_leaf,
            Node::Internal(internal) => internal.keys.len() > self.min_internal,
        }
    }

    /// Inserts `(key, rid)`. Re-inserting an existing pair is a no-op.
    pub fn insert(&self, key_values: &[Value], rid: Rid) -> DbResult<()> {
        let user = self.codec.encode(key_values)?;
        let fk = node::full_key(&user, rid);

        let meta_guard = self.pool.fetch_write(self.meta_page)?;
        let root_id = root_of(&meta_guard);
        let mut meta = Some(meta_guard);
        let mut guard = self.pool.fetch_write(root_id)?;
        let mut current = self.read_node(&guard)?;
        if self.insert_safe(&current) {
            meta = None;
        }
        let mut ancestors: Vec<(PageWriteGuard, InternalNode)> = Vec::new();

        loop {
            match current {
                Node::Internal(internal) => {
                    let child_id = internal.children[internal.child_index(&fk)];
                    let child_guard = self.pool.fetch_write(child_id)?;
                    let child_node = self.read_node(&child_guard)?;
                    ancestors.push((guard, internal));
                    if self.insert_safe(&child_node) {
                        ancestors.clear();
                        meta = None;
                    }
                    guard = child_guard;
                    current = child_node;
                }
                Node::Leaf(mut leaf) => {
                    let pos = leaf.entries.partition_point(|k| k.as_slice() < fk.as_slice());
                    if leaf.entries.get(pos).is_some_and(|k| k == &fk) {
                        return Ok(());
                    }
                    leaf.entries.insert(pos, fk);
                    if leaf.entries.len() <= self.leaf_cap {
                        Node::Leaf(leaf).write(&mut guard, self.full_key_size);
                        return Ok(());
                    }

                    // Split at the median; the right sibling's first key
                    // becomes the promoted separator.
                    let mid = leaf.entries.len() / 2;
                    let right_entries = leaf.entries.split_off(mid);
                    let sep = right_entries[0].clone();
                    let mut right_guard = self.pool.new_page()?;
                    let right_id = right_guard.page_id();
                    Node::Leaf(LeafNode {
                        entries: right_entries,
                        next_leaf: leaf.next_leaf,
                    })
                    .write(&mut right_guard, self.full_key_size);
                    leaf.next_leaf = right_id;
                    let left_id = guard.page_id();
                    Node::Leaf(leaf).write(&mut guard, self.full_key_size);
                    drop(right_guard);
                    drop(guard);
                    return self.propagate_split(meta, ancestors, left_id, sep, right_id);
                }
            }
        }
    }

    fn propagate_split(
        &self,
        meta: Option<PageWriteGuard>,
        mut ancestors: Vec<(PageWriteGuard, InternalNode)>,
        mut left_id: PageId,
        mut sep: Vec<u8>,
        mut right_id: PageId,
    ) -> DbResult<()> {
        while let Some((mut guard, mut internal)) = ancestors.pop() {
            let idx = internal.keys.partition_point(|k| k.as_slice() <= sep.as_slice());
            internal.keys.insert(idx, sep);
            internal.children.insert(idx + 1, right_id);
            if internal.keys.len() <= self.internal_cap {
                Node::Internal(internal).write(&mut guard, self.full_key_size);
                return Ok(());
            }

            let mid = internal.keys.len() / 2;
            let right_keys = internal.keys.split_off(mid + 1);
            let promote = internal.keys.pop().expect("split of non-empty node");
            let right_children = internal.children.split_off(mid + 1);
            let mut right_guard = self.pool.new_page()?;
            let new_right = right_guard.page_id();
            Node::Internal(InternalNode {
                keys: right_keys,
                children: right_children,
            })
            .write(&mut right_guard, self.full_key_size);
            left_id = guard.page_id();
            Node::Internal(internal).write(&mut guard, self.full_key_size);
            sep = promote;
            right_id = new_right;
            drop(right_guard);
            drop(guard);
        }

        // The split reached the root: grow the tree by one level.
        let mut meta_guard =
            meta.ok_or_else(|| DbError::Internal("root split without the root latch".into()))?;
        let mut root_guard = self.pool.new_page()?;
        let new_root = root_guard.page_id();
        Node::Internal(InternalNode {
            keys: vec![sep],
            children: vec![left_id, right_id],
        })
        .write(&mut root_guard, self.full_key_size);
        set_root(&mut meta_guard, new_root);
        tracing::debug!(index = self.index.0, root = new_root.0, "b+tree grew a level");
        Ok(())
    }

    /// Removes `(key, rid)`; returns whether the entry existed.
    pub fn delete(&self, key_values: &[Value], rid: Rid) -> DbResult<bool> {
        let user = self.codec.encode(key_values)?;
        let fk = node::full_key(&user, rid);

        let meta_guard = self.pool.fetch_write(self.meta_page)?;
        let root_id = root_of(&meta_guard);
        let mut meta = Some(meta_guard);
        let mut guard = self.pool.fetch_write(root_id)?;
        let mut current = self.read_node(&guard)?;
        if self.delete_safe(&current) {
            meta = None;
        }
        let mut ancestors: Vec<(PageWriteGuard, InternalNode, usize)> = Vec::new();

        loop {
            match current {
                Node::Internal(internal) => {
                    let idx = internal.child_index(&fk);
                    let child_id = internal.children[idx];
                    let child_guard = self.pool.fetch_write(child_id)?;
                    let child_node = self.read_node(&child_guard)?;
                    ancestors.push((guard, internal, idx));
                    if self.delete_safe(&child_node) {
                        ancestors.clear();
                        meta = None;
                    }
                    guard = child_guard;
                    current = child_node;
                }
                Node::Leaf(mut leaf) => {
                    let Ok(pos) = leaf.entries.binary_search(&fk) else {
                        return Ok(false);
                    };
                    leaf.entries.remove(pos);
                    let len = leaf.entries.len();
                    Node::Leaf(leaf).write(&mut guard, self.full_key_size);
                    if ancestors.is_empty() || len >= self.min_leaf {
                        return Ok(true);
                    }
                    self.rebalance(&mut meta, &mut ancestors, guard)?;
                    return Ok(true);
                }
            }
        }
    }

    /// Fixes an underflowed node: borrow from a sibling with spare
    /// entries, otherwise merge and propagate the separator removal.
    fn rebalance(
        &self,
        meta: &mut Option<PageWriteGuard>,
        ancestors: &mut Vec<(PageWriteGuard, InternalNode, usize)>,
        mut child_guard: PageWriteGuard,
    ) -> DbResult<()> {
        let child_node = self.read_node(&child_guard)?;
        let (mut parent_guard, mut parent, child_idx) =
            ancestors.pop().expect("underflowed node must have a parent");

        // Borrow from the left sibling.
        if child_idx > 0 {
            let left_id = parent.children[child_idx - 1];
            let mut left_guard = self.pool.fetch_write(left_id)?;
            match (self.read_node(&left_guard)?, &child_node) {
                (Node::Leaf(mut left), Node::Leaf(child))
                    if left.entries.len() > self.min_leaf =>
                {
                    let mut child = child.clone();
                    let moved = left.entries.pop().expect("left sibling has spare");
                    child.entries.insert(0, moved);
                    parent.keys[child_idx - 1] = child.entries[0].clone();
                    Node::Leaf(left).write(&mut left_guard, self.full_key_size);
                    Node::Leaf(child).write(&mut child_guard, self.full_key_size);
                    Node::Internal(parent).write(&mut parent_guard, self.full_key_size);
                    return Ok(());
                }
                (Node::Internal(mut left), Node::Internal(child))
                    if left.keys.len() > self.min_internal =>
                {
                    let mut child = child.clone();
                    let new_sep = left.keys.pop().expect("left sibling has spare");
                    let sep = std::mem::replace(&mut parent.keys[child_idx - 1], new_sep);
                    let moved_child = left.children.pop().expect("left sibling has spare");
                    child.keys.insert(0, sep);
                    child.children.insert(0, moved_child);
                    Node::Internal(left).write(&mut left_guard, self.full_key_size);
                    Node::Internal(child).write(&mut child_guard, self.full_key_size);
                    Node::Internal(parent).write(&mut parent_guard, self.full_key_size);
                    return Ok(());
                }
                _ => {}
            }
        }

        // Borrow from the right sibling.
        if child_idx + 1 < parent.children.len() {
            let right_id = parent.children[child_idx + 1];
            let mut right_guard = self.pool.fetch_write(right_id)?;
            match (self.read_node(&right_guard)?, &child_node) {
                (Node::Leaf(mut right), Node::Leaf(child))
                    if right.entries.len() > self.min_leaf =>
                {
                    let mut child = child.clone();
                    child.entries.push(right.entries.remove(0));
                    parent.keys[child_idx] = right.entries[0].clone();
                    Node::Leaf(right).write(&mut right_guard, self.full_key_size);
                    Node::Leaf(child).write(&mut child_guard, self.full_key_size);
                    Node::Internal(parent).write(&mut parent_guard, self.full_key_size);
                    return Ok(());
                }
                (Node::Internal(mut right), Node::Internal(child))
                    if right.keys.len() > self.min_internal =>
                {
                    let mut child = child.clone();
                    let sep = std::mem::replace(&mut parent.keys[child_idx], right.keys.remove(0));
                    child.keys.push(sep);
                    child.children.push(right.children.remove(0));
                    Node::Internal(right).write(&mut right_guard, self.full_key_size);
                    Node::Internal(child).write(&mut child_guard, self.full_key_size);
                    Node::Internal(parent).write(&mut parent_guard, self.full_key_size);
                    return Ok(());
                }
                _ => {}
            }
        }

        // No spare anywhere: merge. The orphaned page is abandoned (space
        // is not reclaimed).
        if child_idx > 0 {
            let left_id = parent.children[child_idx - 1];
            let mut left_guard = self.pool.fetch_write(left_id)?;
            match (self.read_node(&left_guard)?, child_node) {
                (Node::Leaf(mut left), Node::Leaf(child)) => {
                    left.entries.extend(child.entries);
                    left.next_leaf = child.next_leaf;
                    Node::Leaf(left).write(&mut left_guard, self.full_key_size);
                }
                (Node::Internal(mut left), Node::Internal(child)) => {
                    left.keys.push(parent.keys[child_idx - 1].clone());
                    left.keys.extend(child.keys);
                    left.children.extend(child.children);
                    Node::Internal(left).write(&mut left_guard, self.full_key_size);
                }
                _ => return Err(DbError::Corruption("sibling node kind mismatch".into())),
            }
            parent.keys.remove(child_idx - 1);
            parent.children.remove(child_idx);
        } else {
            let right_id = parent.children[1];
            let mut right_guard = self.pool.fetch_write(right_id)?;
            match (self.read_node(&right_guard)?, child_node) {
                (Node::Leaf(right), Node::Leaf(mut child)) => {
                    child.entries.extend(right.entries);
                    child.next_leaf = right.next_leaf;
                    Node::Leaf(child).write(&mut child_guard, self.full_key_size);
                }
                (Node::Internal(right), Node::Internal(mut child)) => {
                    child.keys.push(parent.keys[0].clone());
                    child.keys.extend(right.keys);
                    child.children.extend(right.children);
                    Node::Internal(child).write(&mut child_guard, self.full_key_size);
                }
                _ => return Err(DbError::Corruption("sibling node kind mismatch".into())),
            }
            parent.keys.remove(0);
            parent.children.remove(1);
        }
        drop(child_guard);

        if ancestors.is_empty() {
            if parent.keys.is_empty() {
                // The root lost its last separator: its single child is
                // the new root.
                let meta_guard = meta
                    .as_mut()
                    .ok_or_else(|| DbError::Internal("root collapse without the root latch".into()))?;
                set_root(meta_guard, parent.children[0]);
                tracing::debug!(index = self.index.0, "b+tree shrank a level");
            }
            Node::Internal(parent).write(&mut parent_guard, self.full_key_size);
            return Ok(());
        }

        let underflow = parent.keys.len() < self.min_internal;
        Node::Internal(parent).write(&mut parent_guard, self.full_key_size);
        if underflow {
            return self.rebalance(meta, ancestors, parent_guard);
        }
        Ok(())
    }

    /// All RIDs stored under exactly this key.
    pub fn lookup(&self, key_values: &[Value]) -> DbResult<Vec<Rid>> {
        let mut iter = self.range(Some((key_values, true)), Some((key_values, true)))?;
        let mut rids = Vec::new();
        while let Some((_, rid)) = iter.next_entry()? {
            rids.push(rid);
        }
        Ok(rids)
    }

    /// Range scan over user keys; bounds carry an inclusivity flag.
    pub fn range(
        &self,
        low: Option<(&[Value], bool)>,
        high: Option<(&[Value], bool)>,
    ) -> DbResult<BTreeRangeIter> {
        let low_bound = match low {
            Some((values, inclusive)) => Some((self.codec.encode(values)?, inclusive)),
            None => None,
        };
        let high_bound = match high {
            Some((values, inclusive)) => Some((self.codec.encode(values)?, inclusive)),
            None => None,
        };

        let descent_key = low_bound
            .as_ref()
            .map(|(user, _)| node::full_key(user, Rid::new(PageId(0), 0)));
        let (guard, leaf) = self.descend_read(descent_key.as_deref())?;
        let user_len = self.codec.key_size();
        let pos = match &low_bound {
            Some((user, inclusive)) => leaf.entries.partition_point(|fk| {
                if *inclusive {
                    &fk[..user_len] < user.as_slice()
                } else {
                    &fk[..user_len] <= user.as_slice()
                }
            }),
            None => 0,
        };

        Ok(BTreeRangeIter {
            pool: self.pool.clone(),
            full_key_size: self.full_key_size,
            user_key_size: user_len,
            current: Some((guard, leaf, pos)),
            low: low_bound,
            high: high_bound,
        })
    }

    /// Every entry in key order; used by tests and index verification.
    pub fn scan_all(&self) -> DbResult<Vec<(Vec<u8>, Rid)>> {
        let mut iter = self.range(None, None)?;
        let mut out = Vec::new();
        while let Some(entry) = iter.next_entry()? {
            out.push(entry);
        }
        Ok(out)
    }

    /// S-latched descent with coupling: the child is latched before the
    /// parent guard drops.
    fn descend_read(&self, key: Option<&[u8]>) -> DbResult<(PageReadGuard, LeafNode)> {
        let meta_guard = self.pool.fetch_read(self.meta_page)?;
        let root_id = root_of(&meta_guard);
        let mut guard = self.pool.fetch_read(root_id)?;
        drop(meta_guard);
        loop {
            match self.read_node(&guard)? {
                Node::Internal(internal) => {
                    let child_id = match key {
                        Some(key) => internal.children[internal.child_index(key)],
                        None => internal.children[0],
                    };
                    let child_guard = self.pool.fetch_read(child_id)?;
                    guard = child_guard;
                }
                Node::Leaf(leaf) => return Ok((guard, leaf)),
            }
        }
    }
}

/// Forward iterator over a key range. Holds the current leaf's read latch
/// (and pin); the latch is released before the next leaf is acquired, so
/// a scan never participates in a latch cycle with structural changes.
pub struct BTreeRangeIter {
    pool: BufferPool,
    full_key_size: usize,
    user_key_size: usize,
    current: Option<(PageReadGuard, LeafNode, usize)>,
    low: Option<(Vec<u8>, bool)>,
    high: Option<(Vec<u8>, bool)>,
}

impl BTreeRangeIter {
    /// Next `(full_key, rid)` in order, or `None` past the high bound.
    pub fn next_entry(&mut self) -> DbResult<Option<(Vec<u8>, Rid)>> {
        enum Step {
            Entry(Vec<u8>),
            Hop(PageId),
        }

        loop {
            let step = match self.current.as_mut() {
                None => return Ok(None),
                Some((_, leaf, pos)) => {
                    if *pos < leaf.entries.len() {
                        let fk = leaf.entries[*pos].clone();
                        *pos += 1;
                        Step::Entry(fk)
                    } else {
                        Step::Hop(leaf.next_leaf)
                    }
                }
            };

            match step {
                Step::Entry(fk) => {
                    let user = &fk[..self.user_key_size];
                    if let Some((low, inclusive)) = &self.low {
                        // Possible when a concurrent merge shifted entries
                        // left; skip anything below the bound.
                        let below = if *inclusive {
                            user < low.as_slice()
                        } else {
                            user <= low.as_slice()
                        };
                        if below {
                            continue;
                        }
                    }
                    if let Some((high, inclusive)) = &self.high {
                        let past = if *inclusive {
                            user > high.as_slice()
                        } else {
                            user >= high.as_slice()
                        };
                        if past {
                            self.current = None;
                            return Ok(None);
                        }
                    }
                    let rid = node::rid_of(&fk);
                    return Ok(Some((fk, rid)));
                }
                Step::Hop(next) => {
                    // Release before acquire; see the type-level comment.
                    self.current = None;
                    if !next.is_valid() {
                        return Ok(None);
                    }
                    let guard = self.pool.fetch_read(next)?;
                    let leaf = match Node::read(&guard, self.full_key_size) {
                        Some(Node::Leaf(leaf)) => leaf,
                        _ => {
                            return Err(DbError::Corruption(
                                "leaf chain points at a non-leaf page".into(),
                            ))
                        }
                    };
                    self.current = Some((guard, leaf, 0));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
