use common::{DbResult, Tuple};
use expr::{eval_binary, eval_unary};
use planner::ResolvedExpr;
use types::Value;

/// Evaluates a bound expression against a tuple. Column references are
/// ordinals, so no name lookup happens per row.
pub fn eval_resolved(expr: &ResolvedExpr, tuple: &Tuple) -> DbResult<Value> {
    match expr {
        ResolvedExpr::Literal(v) => Ok(v.clone()),
        ResolvedExpr::Column(idx) => Ok(tuple.value(*idx)?.clone()),
        ResolvedExpr::Unary { op, expr } => {
            let v = eval_resolved(expr, tuple)?;
            eval_unary(*op, &v)
        }
        ResolvedExpr::Binary { left, op, right } => {
            let lv = eval_resolved(left, tuple)?;
            let rv = eval_resolved(right, tuple)?;
            eval_binary(&lv, *op, &rv)
        }
        ResolvedExpr::IsNull { expr, negated } => {
            let v = eval_resolved(expr, tuple)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
    }
}

/// Predicate form: NULL (unknown) excludes the row.
pub fn eval_resolved_predicate(expr: &ResolvedExpr, tuple: &Tuple) -> DbResult<bool> {
    match eval_resolved(expr, tuple)? {
        Value::Boolean(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(common::DbError::Semantic(format!(
            "predicate evaluated to non-boolean {other}"
        ))),
    }
}
