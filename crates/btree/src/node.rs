use common::{PageId, Rid, PAGE_SIZE};

/// Node header: `u8 kind | u8 pad | u16 nkeys | u32 next_leaf`.
///
/// Entries carry "full keys": the encoded user key with the RID appended
/// big-endian, which makes every entry unique even for duplicate user
/// keys. Leaves store `[full_key]*`; internal nodes store `child0 u32`
/// followed by `[full_key, child u32]*`.
pub const NODE_HEADER: usize = 8;

pub const KIND_INTERNAL: u8 = 1;
pub const KIND_LEAF: u8 = 2;

/// Bytes appended to the user key: `u32 page | u16 slot`, big-endian.
pub const RID_SUFFIX: usize = 6;

pub fn leaf_capacity(full_key_size: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER) / full_key_size
}

pub fn internal_capacity(full_key_size: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER - 4) / (full_key_size + 4)
}

/// Appends the RID suffix that makes a full key unique.
pub fn full_key(user_key: &[u8], rid: Rid) -> Vec<u8> {
    let mut fk = Vec::with_capacity(user_key.len() + RID_SUFFIX);
    fk.extend_from_slice(user_key);
    fk.extend_from_slice(&rid.page_id.0.to_be_bytes());
    fk.extend_from_slice(&rid.slot.to_be_bytes());
    fk
}

/// Recovers the RID from a full key's suffix.
pub fn rid_of(full_key: &[u8]) -> Rid {
    let at = full_key.len() - RID_SUFFIX;
    let page = u32::from_be_bytes(full_key[at..at + 4].try_into().unwrap());
    let slot = u16::from_be_bytes(full_key[at + 4..].try_into().unwrap());
    Rid::new(PageId(page), slot)
}

/// Decoded leaf. Nodes are materialized for manipulation and written back
/// whole; capacities are small enough that this stays cheap.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafNode {
    pub entries: Vec<Vec<u8>>,
    pub next_leaf: PageId,
}

/// Decoded internal node; `children.len() == keys.len() + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct InternalNode {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<PageId>,
}

impl InternalNode {
    /// Child to descend into: the rightmost child whose separator <= key.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn empty_leaf() -> Node {
        Node::Leaf(LeafNode {
            entries: Vec::new(),
            next_leaf: PageId::INVALID,
        })
    }

    pub fn read(data: &[u8], full_key_size: usize) -> Option<Node> {
        let kind = data[0];
        let nkeys = u16::from_le_bytes(data[2..4].try_into().unwrap()) as usize;
        let next_leaf = PageId(u32::from_le_bytes(data[4..8].try_into().unwrap()));
        match kind {
            KIND_LEAF => {
                let mut entries = Vec::with_capacity(nkeys);
                let mut off = NODE_HEADER;
                for _ in 0..nkeys {
                    entries.push(data[off..off + full_key_size].to_vec());
                    off += full_key_size;
                }
                Some(Node::Leaf(LeafNode { entries, next_leaf }))
            }
            KIND_INTERNAL => {
                let mut off = NODE_HEADER;
                let mut children = Vec::with_capacity(nkeys + 1);
                children.push(PageId(u32::from_le_bytes(
                    data[off..off + 4].try_into().unwrap(),
                )));
                off += 4;
                let mut keys = Vec::with_capacity(nkeys);
                for _ in 0..nkeys {
                    keys.push(data[off..off + full_key_size].to_vec());
                    off += full_key_size;
                    children.push(PageId(u32::from_le_bytes(
                        data[off..off + 4].try_into().unwrap(),
                    )));
                    off += 4;
                }
                Some(Node::Internal(InternalNode { keys, children }))
            }
            _ => None,
        }
    }

    pub fn write(&self, data: &mut [u8], full_key_size: usize) {
        data[..NODE_HEADER].fill(0);
        match self {
            Node::Leaf(leaf) => {
                data[0] = KIND_LEAF;
                data[2..4].copy_from_slice(&(leaf.entries.len() as u16).to_le_bytes());
                data[4..8].copy_from_slice(&leaf.next_leaf.0.to_le_bytes());
                let mut off = NODE_HEADER;
                for key in &leaf.entries {
                    debug_assert_eq!(key.len(), full_key_size);
                    data[off..off + full_key_size].copy_from_slice(key);
                    off += full_key_size;
                }
            }
            Node::Internal(node) => {
                debug_assert_eq!(node.children.len(), node.keys.len() + 1);
                data[0] = KIND_INTERNAL;
                data[2..4].copy_from_slice(&(node.keys.len() as u16).to_le_bytes());
                data[4..8].copy_from_slice(&PageId::INVALID.0.to_le_bytes());
                let mut off = NODE_HEADER;
                data[off..off + 4].copy_from_slice(&node.children[0].0.to_le_bytes());
                off += 4;
                for (key, child) in node.keys.iter().zip(node.children.iter().skip(1)) {
                    debug_assert_eq!(key.len(), full_key_size);
                    data[off..off + full_key_size].copy_from_slice(key);
                    off += full_key_size;
                    data[off..off + 4].copy_from_slice(&child.0.to_le_bytes());
                    off += 4;
                }
            }
        }
    }
}
