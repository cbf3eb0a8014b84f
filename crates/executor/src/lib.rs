//! Volcano-style executor: each operator exposes `init` and `next` and
//! pulls tuples from its children. Tuples carry their RID so mutation
//! operators can reach back into the heap, and every operator checks the
//! statement's cancel token at its `next` boundary.

mod agg;
mod builder;
mod dml;
mod eval;
mod filter;
mod join;
mod limit;
mod project;
mod runtime;
mod scan;
mod sort;

pub use builder::build_executor;
pub use dml::{coerce_row, row_values};
pub use eval::eval_resolved;
pub use runtime::Runtime;

use common::{CancelToken, DbError, DbResult, NoiseFn, Tuple};
use planner::PhysicalPlan;
use txn::Transaction;
use types::Value;

/// Pull iterator contract implemented by every operator.
pub trait Executor {
    /// Prepares (or rewinds) the operator.
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// Produces the next tuple, or `None` when exhausted.
    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>>;

    /// Output column labels.
    fn schema(&self) -> &[String];
}

/// Everything an operator needs: the shared runtime objects, the calling
/// transaction, and per-statement controls.
pub struct ExecutionContext<'a> {
    pub runtime: &'a Runtime,
    pub txn: &'a mut Transaction,
    pub cancel: CancelToken,
    pub noise: Option<NoiseFn>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(runtime: &'a Runtime, txn: &'a mut Transaction) -> Self {
        Self {
            runtime,
            txn,
            cancel: CancelToken::new(),
            noise: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_noise(mut self, noise: Option<NoiseFn>) -> Self {
        self.noise = noise;
        self
    }
}

/// Runs a query plan to completion, returning the output schema and rows.
pub fn execute_query(
    plan: PhysicalPlan,
    ctx: &mut ExecutionContext,
) -> DbResult<(Vec<String>, Vec<Tuple>)> {
    let mut executor = build_executor(plan);
    executor.init(ctx)?;
    let schema = executor.schema().to_vec();
    let mut rows = Vec::new();
    while let Some(tuple) = executor.next(ctx)? {
        rows.push(tuple);
    }
    Ok((schema, rows))
}

/// Runs a DML plan; the terminal operator reports the affected row count
/// as a single one-column tuple.
pub fn execute_dml(plan: PhysicalPlan, ctx: &mut ExecutionContext) -> DbResult<u64> {
    let mut executor = build_executor(plan);
    executor.init(ctx)?;
    let result = executor
        .next(ctx)?
        .ok_or_else(|| DbError::Internal("DML operator produced no count".into()))?;
    match result.value(0)? {
        Value::BigInt(n) => Ok(*n as u64),
        other => Err(DbError::Internal(format!(
            "DML count must be an integer, got {other}"
        ))),
    }
}
