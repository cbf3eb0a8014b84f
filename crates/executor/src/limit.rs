//! Limit operator: counts rows and stops.

use crate::{ExecutionContext, Executor};
use common::{DbResult, Tuple};

pub struct LimitExec {
    input: Box<dyn Executor>,
    limit: u64,
    produced: u64,
}

impl LimitExec {
    pub fn new(input: Box<dyn Executor>, limit: u64) -> Self {
        Self {
            input,
            limit,
            produced: 0,
        }
    }
}

impl Executor for LimitExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.produced = 0;
        self.input.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        ctx.cancel.check()?;
        if self.produced >= self.limit {
            return Ok(None);
        }
        match self.input.next(ctx)? {
            Some(tuple) => {
                self.produced += 1;
                Ok(Some(tuple))
            }
            None => Ok(None),
        }
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
