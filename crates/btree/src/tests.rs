use super::*;
use common::{Column, PageId, Rid};
use std::sync::Arc;
use storage::DiskManager;
use tempfile::tempdir;
use types::{SqlType, Value};

fn int_tree(frames: usize) -> (BPlusTree, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("db.lat")).unwrap());
    let pool = BufferPool::new(disk, frames);
    let codec = KeyCodec::new(&[Column::new("id", SqlType::Integer)]);
    let tree = BPlusTree::create(pool, IndexOid(1), codec).unwrap();
    (tree, dir)
}

fn rid(page: u32, slot: u16) -> Rid {
    Rid::new(PageId(page), slot)
}

fn int_key(v: i32) -> Vec<Value> {
    vec![Value::Integer(v)]
}

#[test]
fn insert_and_lookup() {
    let (tree, _dir) = int_tree(16);

    tree.insert(&int_key(5), rid(1, 0)).unwrap();
    tree.insert(&int_key(3), rid(1, 1)).unwrap();
    tree.insert(&int_key(9), rid(1, 2)).unwrap();

    assert_eq!(tree.lookup(&int_key(3)).unwrap(), vec![rid(1, 1)]);
    assert_eq!(tree.lookup(&int_key(9)).unwrap(), vec![rid(1, 2)]);
    assert!(tree.lookup(&int_key(4)).unwrap().is_empty());
}

#[test]
fn duplicate_keys_return_all_rids() {
    let (tree, _dir) = int_tree(16);

    tree.insert(&int_key(7), rid(1, 0)).unwrap();
    tree.insert(&int_key(7), rid(1, 1)).unwrap();
    tree.insert(&int_key(7), rid(2, 0)).unwrap();

    let mut rids = tree.lookup(&int_key(7)).unwrap();
    rids.sort();
    assert_eq!(rids, vec![rid(1, 0), rid(1, 1), rid(2, 0)]);
}

#[test]
fn reinsert_is_idempotent() {
    let (tree, _dir) = int_tree(16);
    tree.insert(&int_key(1), rid(1, 0)).unwrap();
    tree.insert(&int_key(1), rid(1, 0)).unwrap();
    assert_eq!(tree.lookup(&int_key(1)).unwrap().len(), 1);
}

#[test]
fn delete_removes_exact_entry() {
    let (tree, _dir) = int_tree(16);

    tree.insert(&int_key(7), rid(1, 0)).unwrap();
    tree.insert(&int_key(7), rid(1, 1)).unwrap();

    assert!(tree.delete(&int_key(7), rid(1, 0)).unwrap());
    assert_eq!(tree.lookup(&int_key(7)).unwrap(), vec![rid(1, 1)]);
    // Deleting a missing entry reports false.
    assert!(!tree.delete(&int_key(7), rid(1, 0)).unwrap());
}

#[test]
fn split_preserves_order_and_content() {
    let (tree, _dir) = int_tree(64);

    // Enough sequential inserts to force leaf and internal splits.
    for i in 0..2000i32 {
        tree.insert(&int_key(i), rid(10, (i % 1000) as u16)).unwrap();
    }

    let all = tree.scan_all().unwrap();
    assert_eq!(all.len(), 2000);
    let keys: Vec<&Vec<u8>> = all.iter().map(|(k, _)| k).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    for probe in [0, 1, 999, 1000, 1999] {
        assert_eq!(tree.lookup(&int_key(probe)).unwrap().len(), 1);
    }
}

#[test]
fn descending_inserts_stay_sorted() {
    let (tree, _dir) = int_tree(64);
    for i in (0..1500i32).rev() {
        tree.insert(&int_key(i), rid(1, 0)).unwrap();
    }
    let all = tree.scan_all().unwrap();
    assert_eq!(all.len(), 1500);
    let keys: Vec<&Vec<u8>> = all.iter().map(|(k, _)| k).collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn mass_delete_with_merges() {
    let (tree, _dir) = int_tree(64);

    for i in 0..1200i32 {
        tree.insert(&int_key(i), rid(1, 0)).unwrap();
    }
    for i in 0..1100i32 {
        assert!(tree.delete(&int_key(i), rid(1, 0)).unwrap(), "key {i}");
    }

    let all = tree.scan_all().unwrap();
    assert_eq!(all.len(), 100);
    for i in 1100..1200i32 {
        assert_eq!(tree.lookup(&int_key(i)).unwrap().len(), 1, "key {i}");
    }
}

#[test]
fn range_scan_bounds() {
    let (tree, _dir) = int_tree(16);
    for i in 0..20i32 {
        tree.insert(&int_key(i), rid(1, i as u16)).unwrap();
    }

    let collect = |low: Option<(i32, bool)>, high: Option<(i32, bool)>| -> Vec<u16> {
        let low_vals = low.map(|(v, i)| (vec![Value::Integer(v)], i));
        let high_vals = high.map(|(v, i)| (vec![Value::Integer(v)], i));
        let mut iter = tree
            .range(
                low_vals.as_ref().map(|(v, i)| (v.as_slice(), *i)),
                high_vals.as_ref().map(|(v, i)| (v.as_slice(), *i)),
            )
            .unwrap();
        let mut out = Vec::new();
        while let Some((_, rid)) = iter.next_entry().unwrap() {
            out.push(rid.slot);
        }
        out
    };

    assert_eq!(collect(Some((5, true)), Some((8, true))), vec![5, 6, 7, 8]);
    assert_eq!(collect(Some((5, false)), Some((8, false))), vec![6, 7]);
    assert_eq!(collect(None, Some((2, true))), vec![0, 1, 2]);
    assert_eq!(collect(Some((17, false)), None), vec![18, 19]);
}

#[test]
fn varchar_keys_sort_lexicographically() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("db.lat")).unwrap());
    let pool = BufferPool::new(disk, 16);
    let codec = KeyCodec::new(&[Column::new("name", SqlType::Varchar).with_len(10)]);
    let tree = BPlusTree::create(pool, IndexOid(1), codec).unwrap();

    for (i, name) in ["pear", "apple", "fig", "banana"].iter().enumerate() {
        tree.insert(&[Value::Varchar(name.to_string())], rid(1, i as u16))
            .unwrap();
    }

    let slots: Vec<u16> = tree.scan_all().unwrap().iter().map(|(_, r)| r.slot).collect();
    // apple, banana, fig, pear
    assert_eq!(slots, vec![1, 3, 2, 0]);
}

#[test]
fn null_keys_sort_first() {
    let (tree, _dir) = int_tree(16);
    tree.insert(&int_key(1), rid(1, 1)).unwrap();
    tree.insert(&[Value::Null], rid(1, 0)).unwrap();

    let slots: Vec<u16> = tree.scan_all().unwrap().iter().map(|(_, r)| r.slot).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[test]
fn negative_integers_order_correctly() {
    let (tree, _dir) = int_tree(16);
    for (slot, v) in [(0u16, -100i32), (1, -1), (2, 0), (3, 1), (4, 100)] {
        tree.insert(&int_key(v), rid(1, slot)).unwrap();
    }
    let slots: Vec<u16> = tree.scan_all().unwrap().iter().map(|(_, r)| r.slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 3, 4]);
}

#[test]
fn concurrent_disjoint_inserts_all_land() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("db.lat")).unwrap());
    let pool = BufferPool::new(disk, 64);
    let codec = KeyCodec::new(&[Column::new("id", SqlType::Integer)]);
    let tree = Arc::new(BPlusTree::create(pool, IndexOid(1), codec).unwrap());

    let mut handles = Vec::new();
    for t in 0..4i32 {
        let tree = Arc::clone(&tree);
        handles.push(std::thread::spawn(move || {
            for i in 0..300i32 {
                let key = t * 1000 + i;
                tree.insert(&[Value::Integer(key)], rid(5, 0)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let all = tree.scan_all().unwrap();
    assert_eq!(all.len(), 1200);
    let keys: Vec<&Vec<u8>> = all.iter().map(|(k, _)| k).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}
