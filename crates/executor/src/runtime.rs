use btree::{BPlusTree, KeyCodec};
use buffer::BufferPool;
use catalog::{Catalog, IndexMeta};
use common::{DbError, DbResult, IndexOid, TableOid};
use hashbrown::HashMap;
use heap::TableHeap;
use parking_lot::RwLock;
use std::sync::Arc;
use txn::LockManager;
use wal::LogManager;

/// Shared runtime objects: the storage stack plus caches of open table
/// heaps and index trees. Owned by the engine; operators reach it through
/// the `ExecutionContext`.
pub struct Runtime {
    pub catalog: Arc<Catalog>,
    pub pool: BufferPool,
    pub log: Arc<LogManager>,
    pub locks: Arc<LockManager>,
    heaps: RwLock<HashMap<TableOid, Arc<TableHeap>>>,
    indexes: RwLock<HashMap<IndexOid, Arc<BPlusTree>>>,
}

impl Runtime {
    pub fn new(
        catalog: Arc<Catalog>,
        pool: BufferPool,
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            catalog,
            pool,
            log,
            locks,
            heaps: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// The open heap for a table, opening it from catalog metadata on
    /// first use.
    pub fn heap(&self, table: TableOid) -> DbResult<Arc<TableHeap>> {
        if let Some(heap) = self.heaps.read().get(&table) {
            return Ok(Arc::clone(heap));
        }
        let meta = self.catalog.get_table_by_oid(table)?;
        if !meta.first_page.is_valid() {
            return Err(DbError::Internal(format!(
                "table '{}' has no heap pages yet",
                meta.name
            )));
        }
        let heap = Arc::new(TableHeap::open(
            table,
            meta.first_page,
            self.pool.clone(),
            Arc::clone(&self.log),
            Arc::clone(&self.locks),
        ));
        self.heaps.write().insert(table, Arc::clone(&heap));
        Ok(heap)
    }

    /// Registers a freshly created heap.
    pub fn install_heap(&self, table: TableOid, heap: Arc<TableHeap>) {
        self.heaps.write().insert(table, heap);
    }

    /// The open B+Tree for an index.
    pub fn index(&self, oid: IndexOid) -> DbResult<Arc<BPlusTree>> {
        if let Some(tree) = self.indexes.read().get(&oid) {
            return Ok(Arc::clone(tree));
        }
        let meta = self
            .catalog
            .list_indexes()
            .into_iter()
            .map(|name| self.catalog.get_index(&name))
            .collect::<DbResult<Vec<_>>>()?
            .into_iter()
            .find(|i| i.oid == oid)
            .ok_or_else(|| DbError::NotFound(format!("index oid {} unknown", oid.0)))?;
        self.open_index(&meta)
    }

    /// Opens (and caches) the tree behind an index's metadata.
    pub fn open_index(&self, meta: &IndexMeta) -> DbResult<Arc<BPlusTree>> {
        if let Some(tree) = self.indexes.read().get(&meta.oid) {
            return Ok(Arc::clone(tree));
        }
        if !meta.root_page.is_valid() {
            return Err(DbError::Internal(format!(
                "index '{}' has no pages yet",
                meta.name
            )));
        }
        let table = self.catalog.get_table_by_oid(meta.table)?;
        let codec = KeyCodec::new(&meta.key_columns(&table.schema)?);
        let tree = Arc::new(BPlusTree::open(
            self.pool.clone(),
            meta.oid,
            codec,
            meta.root_page,
        ));
        self.indexes.write().insert(meta.oid, Arc::clone(&tree));
        Ok(tree)
    }

    pub fn install_index(&self, oid: IndexOid, tree: Arc<BPlusTree>) {
        self.indexes.write().insert(oid, tree);
    }

    /// Every index on a table, with its open tree.
    pub fn table_indexes(&self, table: TableOid) -> DbResult<Vec<(IndexMeta, Arc<BPlusTree>)>> {
        let mut out = Vec::new();
        for meta in self.catalog.indexes_for(table) {
            let tree = self.open_index(&meta)?;
            out.push((meta, tree));
        }
        Ok(out)
    }

    /// Forgets cached objects for a dropped table.
    pub fn evict_table(&self, table: TableOid, index_oids: &[IndexOid]) {
        self.heaps.write().remove(&table);
        let mut indexes = self.indexes.write();
        for oid in index_oids {
            indexes.remove(oid);
        }
    }

    pub fn evict_index(&self, oid: IndexOid) {
        self.indexes.write().remove(&oid);
    }
}
