//! Sort operator: blocking, stable, NULLs first.

use crate::{ExecutionContext, Executor};
use common::{DbResult, Tuple};
use std::cmp::Ordering;

pub struct SortExec {
    input: Box<dyn Executor>,
    /// `(ordinal, descending)` per key.
    keys: Vec<(usize, bool)>,
    sorted: Option<Vec<Tuple>>,
    cursor: usize,
}

impl SortExec {
    pub fn new(input: Box<dyn Executor>, keys: Vec<(usize, bool)>) -> Self {
        Self {
            input,
            keys,
            sorted: None,
            cursor: 0,
        }
    }

    fn materialize(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let mut rows = Vec::new();
        while let Some(tuple) = self.input.next(ctx)? {
            ctx.cancel.check()?;
            rows.push(tuple);
        }
        let keys = &self.keys;
        // Stable sort: ties keep insertion order.
        rows.sort_by(|a, b| compare_tuples(a, b, keys));
        self.sorted = Some(rows);
        self.cursor = 0;
        Ok(())
    }
}

impl Executor for SortExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.sorted = None;
        self.cursor = 0;
        self.input.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        ctx.cancel.check()?;
        if self.sorted.is_none() {
            self.materialize(ctx)?;
        }
        let rows = self.sorted.as_ref().unwrap();
        if self.cursor >= rows.len() {
            return Ok(None);
        }
        let tuple = rows[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(tuple))
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}

/// Key-list comparison; NULL sorts before every non-NULL value, ties fall
/// through to the next key.
fn compare_tuples(a: &Tuple, b: &Tuple, keys: &[(usize, bool)]) -> Ordering {
    for &(ordinal, desc) in keys {
        let av = a.values.get(ordinal);
        let bv = b.values.get(ordinal);
        let ord = match (av, bv) {
            (Some(av), Some(bv)) => av.total_cmp(bv),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        let ord = if desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
