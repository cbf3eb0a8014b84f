//! Terminal mutation operators: Insert, Update, Delete.
//!
//! Each loops over its input rows, takes row locks through the heap,
//! maintains every index on the table, and returns a single
//! `rows_affected` tuple. Matching rows are materialized before any
//! mutation so an update cannot revisit a row it just relocated.

use crate::eval::{eval_resolved, eval_resolved_predicate};
use crate::{ExecutionContext, Executor};
use catalog::TableMeta;
use common::{DbError, DbResult, Rid, Schema, TableOid, Tuple};
use planner::ResolvedExpr;
use types::{SqlType, Value};

fn count_schema() -> Vec<String> {
    vec!["rows_affected".into()]
}

fn count_tuple(count: u64) -> Tuple {
    Tuple::new(vec![Value::BigInt(count as i64)])
}

/// Evaluates a bound VALUES row (no input columns are in scope).
pub fn row_values(exprs: &[ResolvedExpr]) -> DbResult<Vec<Value>> {
    let empty = Tuple::new(Vec::new());
    exprs.iter().map(|e| eval_resolved(e, &empty)).collect()
}

/// Coerces literal widths to the column types of `schema`.
pub fn coerce_row(values: Vec<Value>, schema: &Schema) -> DbResult<Vec<Value>> {
    values
        .into_iter()
        .zip(schema.columns())
        .map(|(value, column)| {
            let coerced = match (&value, column.ty) {
                (Value::Null, _) => Value::Null,
                (Value::Boolean(_), SqlType::Boolean)
                | (Value::Integer(_), SqlType::Integer)
                | (Value::BigInt(_), SqlType::BigInt)
                | (Value::Double(_), SqlType::Double)
                | (Value::Varchar(_), SqlType::Varchar)
                | (Value::Timestamp(_), SqlType::Timestamp) => value,
                (Value::Integer(v), SqlType::BigInt) => Value::BigInt(*v as i64),
                (Value::Integer(v), SqlType::Double) => Value::Double(*v as f64),
                (Value::Integer(v), SqlType::Timestamp) => Value::Timestamp(*v as i64),
                (Value::BigInt(v), SqlType::Integer) => match i32::try_from(*v) {
                    Ok(narrow) => Value::Integer(narrow),
                    Err(_) => {
                        return Err(DbError::Constraint(format!(
                            "value {v} out of range for INTEGER column '{}'",
                            column.name
                        )))
                    }
                },
                (Value::BigInt(v), SqlType::Double) => Value::Double(*v as f64),
                (Value::BigInt(v), SqlType::Timestamp) => Value::Timestamp(*v),
                _ => {
                    return Err(DbError::Semantic(format!(
                        "type mismatch for column '{}': expected {}, got {value}",
                        column.name, column.ty
                    )))
                }
            };
            Ok(coerced)
        })
        .collect()
}

/// NOT NULL, VARCHAR length, and PRIMARY KEY / UNIQUE enforcement.
/// `exclude` is the row being rewritten by an update.
fn check_constraints(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    values: &[Value],
    exclude: Option<Rid>,
) -> DbResult<()> {
    for (value, column) in values.iter().zip(meta.schema.columns()) {
        if value.is_null() && !column.nullable {
            return Err(DbError::Constraint(format!(
                "NULL in NOT NULL column '{}'",
                column.name
            )));
        }
        if let (Value::Varchar(s), true) = (value, column.declared_len > 0) {
            if s.len() > column.declared_len as usize {
                return Err(DbError::Constraint(format!(
                    "value too long for column '{}' ({} > {})",
                    column.name,
                    s.len(),
                    column.declared_len
                )));
            }
        }
    }

    let pk = meta.schema.primary_key();
    if !pk.is_empty() {
        let key: Vec<Value> = pk.iter().map(|&i| values[i].clone()).collect();
        if !key.iter().any(Value::is_null)
            && has_visible_duplicate(ctx, meta, &pk, &key, exclude)?
        {
            return Err(DbError::Constraint(format!(
                "duplicate primary key in table '{}'",
                meta.name
            )));
        }
    }

    for (ordinal, column) in meta.schema.columns().iter().enumerate() {
        if !column.unique || column.primary_key || values[ordinal].is_null() {
            continue;
        }
        let key = vec![values[ordinal].clone()];
        if has_visible_duplicate(ctx, meta, &[ordinal], &key, exclude)? {
            return Err(DbError::Constraint(format!(
                "duplicate value for unique column '{}'",
                column.name
            )));
        }
    }
    Ok(())
}

/// Duplicate probe: through a matching index when one exists, otherwise a
/// locked table scan.
fn has_visible_duplicate(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    attrs: &[usize],
    key: &[Value],
    exclude: Option<Rid>,
) -> DbResult<bool> {
    let heap = ctx.runtime.heap(meta.oid)?;
    let index = ctx
        .runtime
        .table_indexes(meta.oid)?
        .into_iter()
        .find(|(imeta, _)| imeta.key_attrs == attrs);

    if let Some((_, tree)) = index {
        for rid in tree.lookup(key)? {
            if Some(rid) == exclude {
                continue;
            }
            // Settle visibility (and block on a concurrent writer) via
            // the ordinary read path.
            match heap.get(ctx.txn, rid) {
                Ok(_) => return Ok(true),
                Err(DbError::NotFound(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        return Ok(false);
    }

    let mut cursor = heap.begin_scan(ctx.txn)?;
    while let Some((rid, bytes)) = heap.scan_next(ctx.txn, &mut cursor)? {
        if Some(rid) == exclude {
            continue;
        }
        let row = Tuple::deserialize(&bytes, &meta.schema)?;
        let same = attrs
            .iter()
            .zip(key)
            .all(|(&a, k)| row.values[a].sql_eq(k) == Some(true));
        if same {
            return Ok(true);
        }
    }
    Ok(false)
}

fn index_key(values: &[Value], attrs: &[usize]) -> Vec<Value> {
    attrs.iter().map(|&i| values[i].clone()).collect()
}

pub struct InsertExec {
    table: TableOid,
    rows: Vec<Vec<ResolvedExpr>>,
    done: bool,
    schema: Vec<String>,
}

impl InsertExec {
    pub fn new(table: TableOid, rows: Vec<Vec<ResolvedExpr>>) -> Self {
        Self {
            table,
            rows,
            done: false,
            schema: count_schema(),
        }
    }
}

impl Executor for InsertExec {
    fn init(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let meta = ctx.runtime.catalog.get_table_by_oid(self.table)?;
        let heap = ctx.runtime.heap(self.table)?;
        let indexes = ctx.runtime.table_indexes(self.table)?;

        let mut count = 0u64;
        for exprs in &self.rows {
            ctx.cancel.check()?;
            let values = coerce_row(row_values(exprs)?, &meta.schema)?;
            check_constraints(ctx, &meta, &values, None)?;

            let bytes = Tuple::new(values.clone()).serialize(&meta.schema)?;
            let rid = heap.insert(ctx.txn, &bytes)?;
            for (imeta, tree) in &indexes {
                tree.insert(&index_key(&values, &imeta.key_attrs), rid)?;
            }
            count += 1;
        }
        Ok(Some(count_tuple(count)))
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

pub struct UpdateExec {
    table: TableOid,
    assignments: Vec<(usize, ResolvedExpr)>,
    predicate: Option<ResolvedExpr>,
    done: bool,
    schema: Vec<String>,
}

impl UpdateExec {
    pub fn new(
        table: TableOid,
        assignments: Vec<(usize, ResolvedExpr)>,
        predicate: Option<ResolvedExpr>,
    ) -> Self {
        Self {
            table,
            assignments,
            predicate,
            done: false,
            schema: count_schema(),
        }
    }
}

impl Executor for UpdateExec {
    fn init(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let meta = ctx.runtime.catalog.get_table_by_oid(self.table)?;
        let heap = ctx.runtime.heap(self.table)?;
        let indexes = ctx.runtime.table_indexes(self.table)?;

        let matches = collect_matches(ctx, &heap, &meta, self.predicate.as_ref())?;

        let mut count = 0u64;
        for (rid, old) in matches {
            ctx.cancel.check()?;
            let mut new_values = old.values.clone();
            for (ordinal, expr) in &self.assignments {
                new_values[*ordinal] = eval_resolved(expr, &old)?;
            }
            let new_values = coerce_row(new_values, &meta.schema)?;
            check_constraints(ctx, &meta, &new_values, Some(rid))?;

            let bytes = Tuple::new(new_values.clone()).serialize(&meta.schema)?;
            let new_rid = heap.update(ctx.txn, rid, &bytes)?;

            for (imeta, tree) in &indexes {
                let old_key = index_key(&old.values, &imeta.key_attrs);
                let new_key = index_key(&new_values, &imeta.key_attrs);
                if old_key != new_key || new_rid != rid {
                    tree.delete(&old_key, rid)?;
                    tree.insert(&new_key, new_rid)?;
                }
            }
            count += 1;
        }
        Ok(Some(count_tuple(count)))
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

pub struct DeleteExec {
    table: TableOid,
    predicate: Option<ResolvedExpr>,
    done: bool,
    schema: Vec<String>,
}

impl DeleteExec {
    pub fn new(table: TableOid, predicate: Option<ResolvedExpr>) -> Self {
        Self {
            table,
            predicate,
            done: false,
            schema: count_schema(),
        }
    }
}

impl Executor for DeleteExec {
    fn init(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let meta = ctx.runtime.catalog.get_table_by_oid(self.table)?;
        let heap = ctx.runtime.heap(self.table)?;
        let indexes = ctx.runtime.table_indexes(self.table)?;

        let matches = collect_matches(ctx, &heap, &meta, self.predicate.as_ref())?;

        let mut count = 0u64;
        for (rid, old) in matches {
            ctx.cancel.check()?;
            heap.mark_delete(ctx.txn, rid)?;
            for (imeta, tree) in &indexes {
                tree.delete(&index_key(&old.values, &imeta.key_attrs), rid)?;
            }
            count += 1;
        }
        Ok(Some(count_tuple(count)))
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Materializes the RIDs and rows a mutation will touch before touching
/// any of them.
fn collect_matches(
    ctx: &mut ExecutionContext,
    heap: &heap::TableHeap,
    meta: &TableMeta,
    predicate: Option<&ResolvedExpr>,
) -> DbResult<Vec<(Rid, Tuple)>> {
    let mut cursor = heap.begin_scan(ctx.txn)?;
    let mut matches = Vec::new();
    while let Some((rid, bytes)) = heap.scan_next(ctx.txn, &mut cursor)? {
        ctx.cancel.check()?;
        let tuple = Tuple::deserialize(&bytes, &meta.schema)?;
        let keep = match predicate {
            Some(predicate) => eval_resolved_predicate(predicate, &tuple)?,
            None => true,
        };
        if keep {
            matches.push((rid, tuple));
        }
    }
    Ok(matches)
}
