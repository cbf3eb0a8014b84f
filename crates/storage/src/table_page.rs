use common::{DbError, DbResult, PageId, PAGE_SIZE};

/// Byte layout of a slotted table page:
///
/// ```text
/// 0   u32 page_id
/// 4   u32 prev
/// 8   u32 next
/// 12  u16 tuple_count
/// 14  u16 free_ptr            start of the payload region
/// 16  [u16 offset, u16 len]*  slot directory, growing up
/// ... payloads, growing down from PAGE_SIZE
/// ```
///
/// A slot with `len == 0` is a tombstone; the high bit of `len` marks a
/// delete that has not committed yet (payload retained for rollback).
pub const TABLE_PAGE_HEADER: usize = 16;
pub const SLOT_BYTES: usize = 4;

const DELETE_MASK: u16 = 0x8000;
const LEN_MASK: u16 = 0x7FFF;

const PAGE_ID_OFF: usize = 0;
const PREV_OFF: usize = 4;
const NEXT_OFF: usize = 8;
const COUNT_OFF: usize = 12;
const FREE_PTR_OFF: usize = 14;

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(data[off..off + 4].try_into().unwrap())
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(data[off..off + 2].try_into().unwrap())
}

fn write_u32(data: &mut [u8], off: usize, v: u32) {
    data[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u16(data: &mut [u8], off: usize, v: u16) {
    data[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

/// Read-only view of a table page.
#[derive(Clone, Copy)]
pub struct TablePageView<'a> {
    data: &'a [u8],
}

impl<'a> TablePageView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        PageId(read_u32(self.data, PAGE_ID_OFF))
    }

    pub fn prev(&self) -> PageId {
        PageId(read_u32(self.data, PREV_OFF))
    }

    pub fn next(&self) -> PageId {
        PageId(read_u32(self.data, NEXT_OFF))
    }

    pub fn tuple_count(&self) -> u16 {
        read_u16(self.data, COUNT_OFF)
    }

    pub fn free_ptr(&self) -> u16 {
        read_u16(self.data, FREE_PTR_OFF)
    }

    fn slot_raw(&self, slot: u16) -> DbResult<(u16, u16)> {
        if slot >= self.tuple_count() {
            return Err(DbError::NotFound(format!(
                "slot {slot} out of range on page {}",
                self.page_id()
            )));
        }
        let base = TABLE_PAGE_HEADER + slot as usize * SLOT_BYTES;
        Ok((read_u16(self.data, base), read_u16(self.data, base + 2)))
    }

    /// Payload bytes of a slot; tombstoned slots are `NotFound`.
    /// Delete-marked slots are still readable (commit and rollback need
    /// the payload).
    pub fn tuple_bytes(&self, slot: u16) -> DbResult<&'a [u8]> {
        let (offset, raw_len) = self.slot_raw(slot)?;
        if raw_len == 0 {
            return Err(DbError::NotFound(format!(
                "slot {slot} on page {} is deleted",
                self.page_id()
            )));
        }
        let len = (raw_len & LEN_MASK) as usize;
        let start = offset as usize;
        Ok(&self.data[start..start + len])
    }

    /// Live means visible to scans: neither tombstoned nor delete-marked.
    pub fn is_live(&self, slot: u16) -> bool {
        matches!(self.slot_raw(slot), Ok((_, raw)) if raw != 0 && raw & DELETE_MASK == 0)
    }

    pub fn is_delete_marked(&self, slot: u16) -> bool {
        matches!(self.slot_raw(slot), Ok((_, raw)) if raw & DELETE_MASK != 0)
    }

    pub fn is_tombstone(&self, slot: u16) -> bool {
        matches!(self.slot_raw(slot), Ok((_, 0)))
    }

    pub fn free_space(&self) -> usize {
        let slots_end = TABLE_PAGE_HEADER + self.tuple_count() as usize * SLOT_BYTES;
        (self.free_ptr() as usize).saturating_sub(slots_end)
    }
}

/// Mutable view of a table page.
pub struct TablePage<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn view(&self) -> TablePageView<'_> {
        TablePageView::new(self.data)
    }

    /// Formats a fresh page: empty slot directory, payload region at the end.
    pub fn init(&mut self, page_id: PageId, prev: PageId) {
        self.data.fill(0);
        write_u32(self.data, PAGE_ID_OFF, page_id.0);
        write_u32(self.data, PREV_OFF, prev.0);
        write_u32(self.data, NEXT_OFF, PageId::INVALID.0);
        write_u16(self.data, COUNT_OFF, 0);
        write_u16(self.data, FREE_PTR_OFF, PAGE_SIZE as u16);
    }

    pub fn set_next(&mut self, next: PageId) {
        write_u32(self.data, NEXT_OFF, next.0);
    }

    pub fn set_prev(&mut self, prev: PageId) {
        write_u32(self.data, PREV_OFF, prev.0);
    }

    fn set_slot(&mut self, slot: u16, offset: u16, raw_len: u16) {
        let base = TABLE_PAGE_HEADER + slot as usize * SLOT_BYTES;
        write_u16(self.data, base, offset);
        write_u16(self.data, base + 2, raw_len);
    }

    /// Inserts a payload, reusing a tombstoned slot when one exists.
    /// Returns the slot, or `None` when the page cannot fit the payload.
    pub fn insert_tuple(&mut self, bytes: &[u8]) -> Option<u16> {
        if bytes.len() > LEN_MASK as usize {
            return None;
        }
        let view = self.view();
        let count = view.tuple_count();
        let free = view.free_space();
        let reuse = (0..count).find(|&s| view.is_tombstone(s));

        let slot = match reuse {
            Some(slot) if free >= bytes.len() => slot,
            Some(_) | None => {
                if count == u16::MAX || free < bytes.len() + SLOT_BYTES {
                    return None;
                }
                count
            }
        };

        let new_free_ptr = self.view().free_ptr() - bytes.len() as u16;
        self.data[new_free_ptr as usize..new_free_ptr as usize + bytes.len()]
            .copy_from_slice(bytes);
        write_u16(self.data, FREE_PTR_OFF, new_free_ptr);
        self.set_slot(slot, new_free_ptr, bytes.len() as u16);
        if slot == count {
            write_u16(self.data, COUNT_OFF, count + 1);
        }
        Some(slot)
    }

    /// Places a payload at an exact slot; used by redo and undo, which must
    /// preserve RIDs. The slot must be the next fresh one or a tombstone.
    pub fn insert_tuple_at(&mut self, slot: u16, bytes: &[u8]) -> DbResult<()> {
        let count = self.view().tuple_count();
        if slot > count {
            return Err(DbError::Corruption(format!(
                "restore at slot {slot} but page has {count} slots"
            )));
        }
        if slot < count && !self.view().is_tombstone(slot) {
            return Err(DbError::Corruption(format!(
                "restore at slot {slot} which is occupied"
            )));
        }
        let needed = bytes.len() + if slot == count { SLOT_BYTES } else { 0 };
        if self.view().free_space() < needed {
            return Err(DbError::OutOfResources(
                "page cannot fit restored tuple".into(),
            ));
        }
        let new_free_ptr = self.view().free_ptr() - bytes.len() as u16;
        self.data[new_free_ptr as usize..new_free_ptr as usize + bytes.len()]
            .copy_from_slice(bytes);
        write_u16(self.data, FREE_PTR_OFF, new_free_ptr);
        self.set_slot(slot, new_free_ptr, bytes.len() as u16);
        if slot == count {
            write_u16(self.data, COUNT_OFF, count + 1);
        }
        Ok(())
    }

    /// Overwrites a slot's payload in place. Returns `false` when the new
    /// payload does not fit in the slot's reserved span (the caller then
    /// relocates the row).
    pub fn update_in_place(&mut self, slot: u16, bytes: &[u8]) -> DbResult<bool> {
        let (offset, raw_len) = self.view().slot_raw(slot)?;
        if raw_len == 0 {
            return Err(DbError::NotFound(format!("update of deleted slot {slot}")));
        }
        let span = (raw_len & LEN_MASK) as usize;
        if bytes.len() > span {
            return Ok(false);
        }
        self.data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        self.set_slot(slot, offset, (raw_len & DELETE_MASK) | bytes.len() as u16);
        Ok(true)
    }

    /// Writes a payload back into a slot without the reserved-span check.
    /// Undo and redo only: the bytes being restored previously lived at
    /// this offset, so they fit the original allocation by construction.
    pub fn restore_in_place(&mut self, slot: u16, bytes: &[u8]) -> DbResult<()> {
        let (offset, _) = self.view().slot_raw(slot)?;
        let end = offset as usize + bytes.len();
        if bytes.len() > LEN_MASK as usize || end > PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "restored payload overruns page at slot {slot}"
            )));
        }
        self.data[offset as usize..end].copy_from_slice(bytes);
        self.set_slot(slot, offset, bytes.len() as u16);
        Ok(())
    }

    /// First delete phase: hide the row from scans but keep the payload.
    pub fn mark_delete(&mut self, slot: u16) -> DbResult<()> {
        let (offset, raw_len) = self.view().slot_raw(slot)?;
        if raw_len == 0 {
            return Err(DbError::NotFound(format!("delete of deleted slot {slot}")));
        }
        self.set_slot(slot, offset, raw_len | DELETE_MASK);
        Ok(())
    }

    /// Abort path: make a marked row visible again.
    pub fn rollback_delete(&mut self, slot: u16) -> DbResult<()> {
        let (offset, raw_len) = self.view().slot_raw(slot)?;
        self.set_slot(slot, offset, raw_len & LEN_MASK);
        Ok(())
    }

    /// Commit path: turn the slot into a tombstone. The payload space is
    /// left unreclaimed; the slot itself is reusable by later inserts.
    pub fn apply_delete(&mut self, slot: u16) -> DbResult<()> {
        let (offset, raw_len) = self.view().slot_raw(slot)?;
        if raw_len == 0 {
            return Err(DbError::NotFound(format!(
                "apply_delete of deleted slot {slot}"
            )));
        }
        self.set_slot(slot, offset, 0);
        Ok(())
    }
}
