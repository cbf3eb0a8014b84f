//! Filter operator: stateless predicate transducer.

use crate::eval::eval_resolved_predicate;
use crate::{ExecutionContext, Executor};
use common::{DbResult, Tuple};
use planner::ResolvedExpr;

pub struct FilterExec {
    input: Box<dyn Executor>,
    predicate: ResolvedExpr,
}

impl FilterExec {
    pub fn new(input: Box<dyn Executor>, predicate: ResolvedExpr) -> Self {
        Self { input, predicate }
    }
}

impl Executor for FilterExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        loop {
            ctx.cancel.check()?;
            match self.input.next(ctx)? {
                None => return Ok(None),
                Some(tuple) => {
                    if eval_resolved_predicate(&self.predicate, &tuple)? {
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
