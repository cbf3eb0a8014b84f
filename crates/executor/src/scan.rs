//! Table access operators: sequential scan and index scan.

use crate::{ExecutionContext, Executor};
use btree::BTreeRangeIter;
use common::{DbError, DbResult, IndexOid, Schema, TableOid, Tuple};
use heap::{ScanCursor, TableHeap};
use std::sync::Arc;
use types::Value;

/// Sequential scan in physical row order.
pub struct SeqScanExec {
    table: TableOid,
    schema: Vec<String>,
    table_schema: Option<Schema>,
    heap: Option<Arc<TableHeap>>,
    cursor: Option<ScanCursor>,
}

impl SeqScanExec {
    pub fn new(table: TableOid, schema: Vec<String>) -> Self {
        Self {
            table,
            schema,
            table_schema: None,
            heap: None,
            cursor: None,
        }
    }
}

impl Executor for SeqScanExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let meta = ctx.runtime.catalog.get_table_by_oid(self.table)?;
        let heap = ctx.runtime.heap(self.table)?;
        self.cursor = Some(heap.begin_scan(ctx.txn)?);
        self.table_schema = Some(meta.schema);
        self.heap = Some(heap);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        ctx.cancel.check()?;
        let heap = self.heap.as_ref().expect("init before next");
        let cursor = self.cursor.as_mut().expect("init before next");
        let schema = self.table_schema.as_ref().expect("init before next");

        match heap.scan_next(ctx.txn, cursor)? {
            Some((rid, bytes)) => {
                let tuple = Tuple::deserialize(&bytes, schema)?.with_rid(rid);
                Ok(Some(tuple))
            }
            None => Ok(None),
        }
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Index scan: walks a B+Tree range and fetches rows from the heap,
/// skipping entries whose row is no longer visible.
pub struct IndexScanExec {
    table: TableOid,
    index: IndexOid,
    low: Option<(Value, bool)>,
    high: Option<(Value, bool)>,
    schema: Vec<String>,
    table_schema: Option<Schema>,
    heap: Option<Arc<TableHeap>>,
    iter: Option<BTreeRangeIter>,
}

impl IndexScanExec {
    pub fn new(
        table: TableOid,
        index: IndexOid,
        low: Option<(Value, bool)>,
        high: Option<(Value, bool)>,
        schema: Vec<String>,
    ) -> Self {
        Self {
            table,
            index,
            low,
            high,
            schema,
            table_schema: None,
            heap: None,
            iter: None,
        }
    }
}

impl Executor for IndexScanExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let meta = ctx.runtime.catalog.get_table_by_oid(self.table)?;
        let tree = ctx.runtime.index(self.index)?;

        let low_values = self.low.as_ref().map(|(v, i)| (vec![v.clone()], *i));
        let high_values = self.high.as_ref().map(|(v, i)| (vec![v.clone()], *i));
        let iter = tree.range(
            low_values.as_ref().map(|(v, i)| (v.as_slice(), *i)),
            high_values.as_ref().map(|(v, i)| (v.as_slice(), *i)),
        )?;

        self.heap = Some(ctx.runtime.heap(self.table)?);
        self.table_schema = Some(meta.schema);
        self.iter = Some(iter);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        let heap = self.heap.as_ref().expect("init before next");
        let schema = self.table_schema.as_ref().expect("init before next");
        let iter = self.iter.as_mut().expect("init before next");

        loop {
            ctx.cancel.check()?;
            let Some((_, rid)) = iter.next_entry()? else {
                return Ok(None);
            };
            match heap.get(ctx.txn, rid) {
                Ok(bytes) => {
                    let tuple = Tuple::deserialize(&bytes, schema)?.with_rid(rid);
                    return Ok(Some(tuple));
                }
                // The index can be ahead of visibility: entry for a row
                // deleted by a committed transaction or not yet visible.
                Err(DbError::NotFound(_)) => continue,
                Err(other) => return Err(other),
            }
        }
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}
