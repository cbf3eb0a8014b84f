//! Projection operator, plus DISTINCT deduplication.

use crate::eval::eval_resolved;
use crate::{ExecutionContext, Executor};
use common::{DbResult, Tuple};
use hashbrown::HashSet;
use planner::ResolvedExpr;
use types::Value;

pub struct ProjectionExec {
    input: Box<dyn Executor>,
    exprs: Vec<ResolvedExpr>,
    schema: Vec<String>,
}

impl ProjectionExec {
    pub fn new(input: Box<dyn Executor>, exprs: Vec<ResolvedExpr>, schema: Vec<String>) -> Self {
        Self {
            input,
            exprs,
            schema,
        }
    }
}

impl Executor for ProjectionExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        ctx.cancel.check()?;
        let Some(tuple) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            values.push(eval_resolved(expr, &tuple)?);
        }
        let mut out = Tuple::new(values);
        if let Some(rid) = tuple.rid() {
            out = out.with_rid(rid);
        }
        Ok(Some(out))
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Emits each distinct row once, in first-seen order.
pub struct DistinctExec {
    input: Box<dyn Executor>,
    seen: HashSet<Vec<Value>>,
}

impl DistinctExec {
    pub fn new(input: Box<dyn Executor>) -> Self {
        Self {
            input,
            seen: HashSet::new(),
        }
    }
}

impl Executor for DistinctExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.seen.clear();
        self.input.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        loop {
            ctx.cancel.check()?;
            match self.input.next(ctx)? {
                None => return Ok(None),
                Some(tuple) => {
                    if self.seen.insert(tuple.values.clone()) {
                        return Ok(Some(tuple));
                    }
                }
            }
        }
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
