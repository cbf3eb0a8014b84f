//! Catalog: table and index metadata, persisted on reserved page 0.
//!
//! The in-memory maps are authoritative between mutations; every mutation
//! rewrites page 0 and flushes it, so DDL survives a crash without going
//! through the WAL. A zeroed page 0 is an empty catalog.

use ahash::RandomState;
use buffer::BufferPool;
use common::{
    Column, DbError, DbResult, IndexOid, PageId, Schema, TableOid, CATALOG_PAGE_ID, PAGE_SIZE,
};
use hashbrown::HashMap;
use parking_lot::RwLock;
use types::SqlType;

type Map<K, V> = HashMap<K, V, RandomState>;

const NEXT_TABLE_OID_OFF: usize = PAGE_SIZE - 16;
const NEXT_INDEX_OID_OFF: usize = PAGE_SIZE - 8;

/// Metadata for one registered table.
#[derive(Clone, Debug)]
pub struct TableMeta {
    pub oid: TableOid,
    pub name: String,
    pub first_page: PageId,
    pub schema: Schema,
}

/// Supported index implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
}

/// Metadata for one secondary index.
#[derive(Clone, Debug)]
pub struct IndexMeta {
    pub oid: IndexOid,
    pub name: String,
    pub table: TableOid,
    /// Ordinals of the indexed columns in the table schema.
    pub key_attrs: Vec<usize>,
    /// The index's meta page (root pointer), stable across root moves.
    pub root_page: PageId,
    pub kind: IndexKind,
}

impl IndexMeta {
    /// The key schema: the indexed columns in index order.
    pub fn key_columns(&self, schema: &Schema) -> DbResult<Vec<Column>> {
        self.key_attrs
            .iter()
            .map(|&ordinal| schema.column(ordinal).cloned())
            .collect()
    }
}

#[derive(Default)]
struct Inner {
    tables: Map<String, TableMeta>,
    indexes: Map<String, IndexMeta>,
    next_table_oid: u32,
    next_index_oid: u32,
}

/// Name-keyed catalog backed by page 0.
pub struct Catalog {
    pool: BufferPool,
    inner: RwLock<Inner>,
}

impl Catalog {
    /// Loads the catalog, allocating page 0 on a fresh database.
    pub fn open(pool: BufferPool) -> DbResult<Self> {
        if pool.disk().num_pages() == 0 {
            let allocated = pool.disk().allocate_page()?;
            debug_assert_eq!(allocated, CATALOG_PAGE_ID);
        }
        let catalog = Self {
            pool,
            inner: RwLock::new(Inner::default()),
        };
        catalog.load()?;
        Ok(catalog)
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> DbResult<TableMeta> {
        let key = name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        if inner.tables.contains_key(&key) {
            return Err(DbError::Semantic(format!("table '{name}' already exists")));
        }
        let oid = TableOid(inner.next_table_oid);
        inner.next_table_oid += 1;
        let meta = TableMeta {
            oid,
            name: key.clone(),
            first_page: PageId::INVALID,
            schema,
        };
        inner.tables.insert(key, meta.clone());
        self.persist(&inner)?;
        Ok(meta)
    }

    /// Records where a freshly created heap starts.
    pub fn set_table_first_page(&self, oid: TableOid, first_page: PageId) -> DbResult<()> {
        let mut inner = self.inner.write();
        let table = inner
            .tables
            .values_mut()
            .find(|t| t.oid == oid)
            .ok_or_else(|| DbError::NotFound(format!("table oid {} unknown", oid.0)))?;
        table.first_page = first_page;
        self.persist(&inner)
    }

    pub fn get_table(&self, name: &str) -> DbResult<TableMeta> {
        self.inner
            .read()
            .tables
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DbError::Semantic(format!("unknown table '{name}'")))
    }

    pub fn get_table_by_oid(&self, oid: TableOid) -> DbResult<TableMeta> {
        self.inner
            .read()
            .tables
            .values()
            .find(|t| t.oid == oid)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("table oid {} unknown", oid.0)))
    }

    /// Drops a table and any indexes defined on it. Heap and index pages
    /// are abandoned, not reclaimed.
    pub fn drop_table(&self, name: &str) -> DbResult<TableMeta> {
        let key = name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let meta = inner
            .tables
            .remove(&key)
            .ok_or_else(|| DbError::Semantic(format!("unknown table '{name}'")))?;
        inner.indexes.retain(|_, idx| idx.table != meta.oid);
        self.persist(&inner)?;
        Ok(meta)
    }

    pub fn create_index(
        &self,
        name: &str,
        table_name: &str,
        key_attrs: Vec<usize>,
        kind: IndexKind,
    ) -> DbResult<IndexMeta> {
        if key_attrs.is_empty() {
            return Err(DbError::Semantic(
                "index must cover at least one column".into(),
            ));
        }
        let key = name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        if inner.indexes.contains_key(&key) {
            return Err(DbError::Semantic(format!("index '{name}' already exists")));
        }
        let table = inner
            .tables
            .get(&table_name.to_ascii_lowercase())
            .ok_or_else(|| DbError::Semantic(format!("unknown table '{table_name}'")))?;
        for &ordinal in &key_attrs {
            table.schema.column(ordinal)?;
        }
        let table_oid = table.oid;
        let oid = IndexOid(inner.next_index_oid);
        inner.next_index_oid += 1;
        let meta = IndexMeta {
            oid,
            name: key.clone(),
            table: table_oid,
            key_attrs,
            root_page: PageId::INVALID,
            kind,
        };
        inner.indexes.insert(key, meta.clone());
        self.persist(&inner)?;
        Ok(meta)
    }

    /// Records a created index's meta page.
    pub fn set_index_root(&self, oid: IndexOid, root_page: PageId) -> DbResult<()> {
        let mut inner = self.inner.write();
        let index = inner
            .indexes
            .values_mut()
            .find(|i| i.oid == oid)
            .ok_or_else(|| DbError::NotFound(format!("index oid {} unknown", oid.0)))?;
        index.root_page = root_page;
        self.persist(&inner)
    }

    pub fn get_index(&self, name: &str) -> DbResult<IndexMeta> {
        self.inner
            .read()
            .indexes
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DbError::Semantic(format!("unknown index '{name}'")))
    }

    pub fn drop_index(&self, name: &str) -> DbResult<IndexMeta> {
        let key = name.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let meta = inner
            .indexes
            .remove(&key)
            .ok_or_else(|| DbError::Semantic(format!("unknown index '{name}'")))?;
        self.persist(&inner)?;
        Ok(meta)
    }

    /// All indexes defined on a table.
    pub fn indexes_for(&self, table: TableOid) -> Vec<IndexMeta> {
        let mut indexes: Vec<IndexMeta> = self
            .inner
            .read()
            .indexes
            .values()
            .filter(|i| i.table == table)
            .cloned()
            .collect();
        indexes.sort_by_key(|i| i.oid.0);
        indexes
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_indexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().indexes.keys().cloned().collect();
        names.sort();
        names
    }

    // ---- page 0 serialization ----

    fn persist(&self, inner: &Inner) -> DbResult<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut w = Writer::new(&mut buf);

        let mut tables: Vec<&TableMeta> = inner.tables.values().collect();
        tables.sort_by_key(|t| t.oid.0);
        w.put_u32(tables.len() as u32)?;
        for table in tables {
            w.put_str(&table.name)?;
            w.put_u32(table.oid.0)?;
            w.put_u32(table.first_page.0)?;
            w.put_u32(table.schema.len() as u32)?;
            for column in table.schema.columns() {
                w.put_str(&column.name)?;
                w.put_u8(column.ty.tag())?;
                w.put_u32(column.declared_len)?;
                w.put_u8(column.nullable as u8)?;
                w.put_u8(column.primary_key as u8)?;
                w.put_u8(column.unique as u8)?;
            }
        }

        let mut indexes: Vec<&IndexMeta> = inner.indexes.values().collect();
        indexes.sort_by_key(|i| i.oid.0);
        w.put_u32(indexes.len() as u32)?;
        for index in indexes {
            w.put_str(&index.name)?;
            w.put_u32(index.oid.0)?;
            w.put_u32(index.table.0)?;
            w.put_u32(index.root_page.0)?;
            w.put_u32(index.key_attrs.len() as u32)?;
            for &attr in &index.key_attrs {
                w.put_u32(attr as u32)?;
            }
            w.put_u8(match index.kind {
                IndexKind::BTree => 1,
            })?;
        }
        w.finish()?;

        buf[NEXT_TABLE_OID_OFF..NEXT_TABLE_OID_OFF + 4]
            .copy_from_slice(&inner.next_table_oid.to_le_bytes());
        buf[NEXT_INDEX_OID_OFF..NEXT_INDEX_OID_OFF + 4]
            .copy_from_slice(&inner.next_index_oid.to_le_bytes());

        let mut guard = self.pool.fetch_write(CATALOG_PAGE_ID)?;
        guard.copy_from_slice(&buf);
        drop(guard);
        // DDL durability does not ride the WAL: force the page out now.
        self.pool.flush_page(CATALOG_PAGE_ID)?;
        self.pool.disk().flush()?;
        Ok(())
    }

    fn load(&self) -> DbResult<()> {
        let guard = self.pool.fetch_read(CATALOG_PAGE_ID)?;
        let mut inner = self.inner.write();
        *inner = parse_catalog_page(&guard)?;
        tracing::debug!(
            tables = inner.tables.len(),
            indexes = inner.indexes.len(),
            "catalog loaded"
        );
        Ok(())
    }
}

fn parse_catalog_page(data: &[u8]) -> DbResult<Inner> {
    let mut inner = Inner::default();
    let mut r = Reader::new(data);

    let num_tables = r.get_u32()?;
    let next_table_oid = u32::from_le_bytes(
        data[NEXT_TABLE_OID_OFF..NEXT_TABLE_OID_OFF + 4]
            .try_into()
            .unwrap(),
    );
    let next_index_oid = u32::from_le_bytes(
        data[NEXT_INDEX_OID_OFF..NEXT_INDEX_OID_OFF + 4]
            .try_into()
            .unwrap(),
    );
    // A zeroed page means an empty catalog; oid counters start at 1.
    inner.next_table_oid = next_table_oid.max(1);
    inner.next_index_oid = next_index_oid.max(1);

    for _ in 0..num_tables {
        let name = r.get_str()?;
        let oid = TableOid(r.get_u32()?);
        let first_page = PageId(r.get_u32()?);
        let ncols = r.get_u32()?;
        let mut columns = Vec::with_capacity(ncols as usize);
        for _ in 0..ncols {
            let cname = r.get_str()?;
            let tag = r.get_u8()?;
            let ty = SqlType::from_tag(tag)
                .ok_or_else(|| DbError::Corruption(format!("bad column type tag {tag}")))?;
            let declared_len = r.get_u32()?;
            let nullable = r.get_u8()? != 0;
            let primary_key = r.get_u8()? != 0;
            let unique = r.get_u8()? != 0;
            columns.push(Column {
                name: cname,
                ty,
                declared_len,
                nullable,
                primary_key,
                unique,
            });
        }
        let schema = Schema::try_new(columns)?;
        inner.tables.insert(
            name.clone(),
            TableMeta {
                oid,
                name,
                first_page,
                schema,
            },
        );
    }

    let num_indexes = r.get_u32()?;
    for _ in 0..num_indexes {
        let name = r.get_str()?;
        let oid = IndexOid(r.get_u32()?);
        let table = TableOid(r.get_u32()?);
        let root_page = PageId(r.get_u32()?);
        let nkeys = r.get_u32()?;
        let mut key_attrs = Vec::with_capacity(nkeys as usize);
        for _ in 0..nkeys {
            key_attrs.push(r.get_u32()? as usize);
        }
        let kind = match r.get_u8()? {
            1 => IndexKind::BTree,
            tag => return Err(DbError::Corruption(format!("bad index kind tag {tag}"))),
        };
        inner.indexes.insert(
            name.clone(),
            IndexMeta {
                oid,
                name,
                table,
                key_attrs,
                root_page,
                kind,
            },
        );
    }

    Ok(inner)
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn ensure(&self, extra: usize) -> DbResult<()> {
        if self.pos + extra > NEXT_TABLE_OID_OFF {
            return Err(DbError::OutOfResources(
                "catalog page full; too many tables or indexes".into(),
            ));
        }
        Ok(())
    }

    fn put_u8(&mut self, v: u8) -> DbResult<()> {
        self.ensure(1)?;
        self.buf[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    fn put_u32(&mut self, v: u32) -> DbResult<()> {
        self.ensure(4)?;
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
        Ok(())
    }

    fn put_str(&mut self, s: &str) -> DbResult<()> {
        self.put_u32(s.len() as u32)?;
        self.ensure(s.len())?;
        self.buf[self.pos..self.pos + s.len()].copy_from_slice(s.as_bytes());
        self.pos += s.len();
        Ok(())
    }

    fn finish(self) -> DbResult<()> {
        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn get_u8(&mut self) -> DbResult<u8> {
        let v = *self
            .data
            .get(self.pos)
            .ok_or_else(|| DbError::Corruption("catalog page truncated".into()))?;
        self.pos += 1;
        Ok(v)
    }

    fn get_u32(&mut self) -> DbResult<u32> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| DbError::Corruption("catalog page truncated".into()))?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn get_str(&mut self) -> DbResult<String> {
        let len = self.get_u32()? as usize;
        if len > PAGE_SIZE {
            return Err(DbError::Corruption("catalog string overruns page".into()));
        }
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| DbError::Corruption("catalog page truncated".into()))?;
        self.pos += len;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DbError::Corruption("catalog string is not UTF-8".into()))
    }
}
