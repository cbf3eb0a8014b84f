use super::*;
use common::{PageId, PAGE_SIZE};
use tempfile::tempdir;

#[test]
fn read_past_eof_is_not_found() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path().join("db.lat")).unwrap();

    let mut buf = vec![0u8; PAGE_SIZE];
    let err = disk.read_page(PageId(0), &mut buf).unwrap_err();
    assert!(matches!(err, common::DbError::NotFound(_)));
}

#[test]
fn allocate_write_read_round_trip() {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path().join("db.lat")).unwrap();

    let p0 = disk.allocate_page().unwrap();
    let p1 = disk.allocate_page().unwrap();
    assert_eq!(p0, PageId(0));
    assert_eq!(p1, PageId(1));

    let mut page = vec![0u8; PAGE_SIZE];
    page[0] = 0xAB;
    page[PAGE_SIZE - 1] = 0xCD;
    disk.write_page(p1, &page).unwrap();
    disk.flush().unwrap();

    let mut back = vec![0u8; PAGE_SIZE];
    disk.read_page(p1, &mut back).unwrap();
    assert_eq!(back, page);
}

#[test]
fn pages_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.lat");
    {
        let disk = DiskManager::open(&path).unwrap();
        let pid = disk.allocate_page().unwrap();
        let page = vec![7u8; PAGE_SIZE];
        disk.write_page(pid, &page).unwrap();
        disk.flush().unwrap();
    }
    let disk = DiskManager::open(&path).unwrap();
    assert_eq!(disk.num_pages(), 1);
    let mut back = vec![0u8; PAGE_SIZE];
    disk.read_page(PageId(0), &mut back).unwrap();
    assert!(back.iter().all(|&b| b == 7));
}

#[test]
fn wal_file_sits_next_to_data_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.lat");
    let disk = DiskManager::open(&path).unwrap();
    assert_eq!(disk.wal_path(), dir.path().join("db.lat.wal"));
    assert!(disk.wal_path().exists());
}

fn fresh_page() -> Vec<u8> {
    let mut data = vec![0u8; PAGE_SIZE];
    TablePage::new(&mut data).init(PageId(3), PageId::INVALID);
    data
}

#[test]
fn slotted_insert_and_get() {
    let mut data = fresh_page();
    let mut page = TablePage::new(&mut data);

    let a = page.insert_tuple(b"alpha").unwrap();
    let b = page.insert_tuple(b"bravo").unwrap();
    assert_eq!((a, b), (0, 1));

    let view = TablePageView::new(&data);
    assert_eq!(view.tuple_count(), 2);
    assert_eq!(view.tuple_bytes(0).unwrap(), b"alpha");
    assert_eq!(view.tuple_bytes(1).unwrap(), b"bravo");
}

#[test]
fn delete_mark_hides_but_keeps_payload() {
    let mut data = fresh_page();
    let mut page = TablePage::new(&mut data);
    page.insert_tuple(b"row").unwrap();

    page.mark_delete(0).unwrap();
    assert!(!page.view().is_live(0));
    assert!(page.view().is_delete_marked(0));
    assert_eq!(page.view().tuple_bytes(0).unwrap(), b"row");

    page.rollback_delete(0).unwrap();
    assert!(page.view().is_live(0));
}

#[test]
fn apply_delete_tombstones_and_slot_is_reused() {
    let mut data = fresh_page();
    let mut page = TablePage::new(&mut data);
    page.insert_tuple(b"gone").unwrap();
    page.insert_tuple(b"kept").unwrap();

    page.mark_delete(0).unwrap();
    page.apply_delete(0).unwrap();
    assert!(page.view().is_tombstone(0));
    assert!(page.view().tuple_bytes(0).is_err());

    // Next insert reuses slot 0 rather than growing the directory.
    let slot = page.insert_tuple(b"new").unwrap();
    assert_eq!(slot, 0);
    assert_eq!(page.view().tuple_count(), 2);
    assert_eq!(page.view().tuple_bytes(0).unwrap(), b"new");
}

#[test]
fn update_in_place_respects_reserved_span() {
    let mut data = fresh_page();
    let mut page = TablePage::new(&mut data);
    page.insert_tuple(b"wide-payload").unwrap();

    assert!(page.update_in_place(0, b"tiny").unwrap());
    assert_eq!(page.view().tuple_bytes(0).unwrap(), b"tiny");

    // Larger than the reserved span: caller must relocate.
    assert!(!page.update_in_place(0, b"a-much-larger-payload").unwrap());
}

#[test]
fn page_full_returns_none() {
    let mut data = fresh_page();
    let mut page = TablePage::new(&mut data);

    let payload = vec![9u8; 1000];
    let mut inserted = 0;
    while page.insert_tuple(&payload).is_some() {
        inserted += 1;
    }
    assert_eq!(inserted, 4);
    assert!(page.insert_tuple(&payload).is_none());
    // A smaller payload still fits in the remainder.
    assert!(page.insert_tuple(&[1u8; 16]).is_some());
}

#[test]
fn restore_at_exact_slot() {
    let mut data = fresh_page();
    let mut page = TablePage::new(&mut data);
    page.insert_tuple(b"one").unwrap();
    page.insert_tuple(b"two").unwrap();
    page.mark_delete(1).unwrap();
    page.apply_delete(1).unwrap();

    page.insert_tuple_at(1, b"two-again").unwrap();
    assert_eq!(page.view().tuple_bytes(1).unwrap(), b"two-again");

    // Occupied slots are refused.
    assert!(page.insert_tuple_at(0, b"clobber").is_err());
}
