//! Hash aggregation with GROUP BY, HAVING, and the aggregate-output
//! noise hook.

use crate::eval::{eval_resolved, eval_resolved_predicate};
use crate::{ExecutionContext, Executor};
use common::{DbResult, Tuple};
use expr::{AggAccumulator, AggFunc};
use hashbrown::HashMap;
use planner::ResolvedExpr;
use types::Value;

pub struct AggregateExec {
    input: Box<dyn Executor>,
    group_by: Vec<ResolvedExpr>,
    aggs: Vec<(AggFunc, Option<ResolvedExpr>)>,
    having: Option<ResolvedExpr>,
    schema: Vec<String>,
    output: Option<Vec<Tuple>>,
    cursor: usize,
}

impl AggregateExec {
    pub fn new(
        input: Box<dyn Executor>,
        group_by: Vec<ResolvedExpr>,
        aggs: Vec<(AggFunc, Option<ResolvedExpr>)>,
        having: Option<ResolvedExpr>,
        schema: Vec<String>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggs,
            having,
            schema,
            output: None,
            cursor: 0,
        }
    }

    fn materialize(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let mut groups: HashMap<Vec<Value>, Vec<AggAccumulator>> = HashMap::new();
        let mut order: Vec<Vec<Value>> = Vec::new();

        while let Some(tuple) = self.input.next(ctx)? {
            ctx.cancel.check()?;
            let mut key = Vec::with_capacity(self.group_by.len());
            for expr in &self.group_by {
                key.push(eval_resolved(expr, &tuple)?);
            }
            let accumulators = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                self.aggs
                    .iter()
                    .map(|(func, _)| AggAccumulator::new(*func))
                    .collect()
            });
            for ((_, arg), acc) in self.aggs.iter().zip(accumulators.iter_mut()) {
                let value = match arg {
                    Some(expr) => eval_resolved(expr, &tuple)?,
                    // COUNT(*): the value is irrelevant, every row counts.
                    None => Value::Null,
                };
                acc.update(&value)?;
            }
        }

        // No GROUP BY over empty input still produces exactly one row.
        if order.is_empty() && self.group_by.is_empty() {
            let key = Vec::new();
            groups.insert(
                key.clone(),
                self.aggs
                    .iter()
                    .map(|(func, _)| AggAccumulator::new(*func))
                    .collect(),
            );
            order.push(key);
        }

        let mut output = Vec::with_capacity(order.len());
        for key in order {
            let accumulators = &groups[&key];
            let mut values = key;
            for acc in accumulators {
                values.push(apply_noise(ctx, acc.finish()));
            }
            let row = Tuple::new(values);
            if let Some(having) = &self.having {
                if !eval_resolved_predicate(having, &row)? {
                    continue;
                }
            }
            output.push(row);
        }

        self.output = Some(output);
        self.cursor = 0;
        Ok(())
    }
}

impl Executor for AggregateExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.output = None;
        self.cursor = 0;
        self.input.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        ctx.cancel.check()?;
        if self.output.is_none() {
            self.materialize(ctx)?;
        }
        let rows = self.output.as_ref().unwrap();
        if self.cursor >= rows.len() {
            return Ok(None);
        }
        let row = rows[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(row))
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// The pluggable noise hook: when configured, numeric aggregate outputs
/// pass through it (and come back as DOUBLE).
fn apply_noise(ctx: &ExecutionContext, value: Value) -> Value {
    let Some(noise) = &ctx.noise else {
        return value;
    };
    match value.as_f64() {
        Some(x) => Value::Double(noise(x)),
        None => value,
    }
}
