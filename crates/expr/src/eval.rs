use crate::{BinaryOp, Expr, UnaryOp};
use common::{DbError, DbResult, Tuple};
use types::Value;

/// Evaluates expressions against a row schema of (possibly qualified)
/// column names.
///
/// Schema entries are either simple (`"id"`) or qualified (`"u.id"`); an
/// unqualified reference matches a simple entry or a unique `.name`
/// suffix, a qualified one matches exactly.
pub struct EvalContext<'a> {
    pub schema: &'a [String],
}

impl<'a> EvalContext<'a> {
    pub fn new(schema: &'a [String]) -> Self {
        Self { schema }
    }

    /// Resolves a column reference to its ordinal.
    pub fn resolve(&self, table: Option<&str>, name: &str) -> DbResult<usize> {
        if let Some(qualifier) = table {
            let full = format!("{qualifier}.{name}");
            return self
                .schema
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&full))
                .ok_or_else(|| DbError::Semantic(format!("unknown column '{full}'")));
        }
        let mut matches = self.schema.iter().enumerate().filter(|(_, c)| {
            if c.eq_ignore_ascii_case(name) {
                return true;
            }
            if c.len() <= name.len() {
                return false;
            }
            match c.get(c.len() - name.len() - 1..) {
                Some(tail) => {
                    tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(name)
                }
                None => false,
            }
        });
        let first = matches
            .next()
            .ok_or_else(|| DbError::Semantic(format!("unknown column '{name}'")))?;
        if matches.next().is_some() {
            return Err(DbError::Semantic(format!("ambiguous column '{name}'")));
        }
        Ok(first.0)
    }

    pub fn eval(&self, expr: &Expr, tuple: &Tuple) -> DbResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column { table, name } => {
                let idx = self.resolve(table.as_deref(), name)?;
                Ok(tuple.value(idx)?.clone())
            }
            Expr::Unary { op, expr } => {
                let v = self.eval(expr, tuple)?;
                eval_unary(*op, &v)
            }
            Expr::Binary { left, op, right } => {
                let lv = self.eval(left, tuple)?;
                let rv = self.eval(right, tuple)?;
                eval_binary(&lv, *op, &rv)
            }
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, tuple)?;
                Ok(Value::Boolean(v.is_null() != *negated))
            }
            Expr::Aggregate { .. } => Err(DbError::Semantic(
                "aggregate used outside GROUP BY context".into(),
            )),
        }
    }

    /// Predicate evaluation: NULL (unknown) excludes the row.
    pub fn eval_predicate(&self, expr: &Expr, tuple: &Tuple) -> DbResult<bool> {
        match self.eval(expr, tuple)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(DbError::Semantic(format!(
                "predicate evaluated to non-boolean {other}"
            ))),
        }
    }
}

pub fn eval_unary(op: UnaryOp, v: &Value) -> DbResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    match op {
        UnaryOp::Not => match v {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(DbError::Semantic(format!("NOT applied to {other}"))),
        },
        UnaryOp::Neg => match v {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::BigInt(i) => Ok(Value::BigInt(-i)),
            Value::Double(d) => Ok(Value::Double(-d)),
            other => Err(DbError::Semantic(format!("- applied to {other}"))),
        },
    }
}

pub fn eval_binary(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    use BinaryOp::*;
    match op {
        And | Or => eval_logic(l, op, r),
        Eq | Ne | Lt | Le | Gt | Ge => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ord = l.compare(r).ok_or_else(|| {
                DbError::Semantic(format!("cannot compare {l} with {r}"))
            })?;
            let result = match op {
                Eq => ord.is_eq(),
                Ne => ord.is_ne(),
                Lt => ord.is_lt(),
                Le => ord.is_le(),
                Gt => ord.is_gt(),
                Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Boolean(result))
        }
        Add | Sub | Mul | Div | Mod => eval_arith(l, op, r),
    }
}

/// Kleene three-valued AND/OR.
fn eval_logic(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    let as_tri = |v: &Value| -> DbResult<Option<bool>> {
        match v {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            other => Err(DbError::Semantic(format!("{other} is not a boolean"))),
        }
    };
    let lv = as_tri(l)?;
    let rv = as_tri(r)?;
    let out = match op {
        BinaryOp::And => match (lv, rv) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lv, rv) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!(),
    };
    Ok(out.map_or(Value::Null, Value::Boolean))
}

fn eval_arith(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    use BinaryOp::*;
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let float = matches!(l, Value::Double(_)) || matches!(r, Value::Double(_));
    if float {
        let (a, b) = (
            l.as_f64()
                .ok_or_else(|| DbError::Semantic(format!("{l} is not numeric")))?,
            r.as_f64()
                .ok_or_else(|| DbError::Semantic(format!("{r} is not numeric")))?,
        );
        if matches!(op, Div | Mod) && b == 0.0 {
            return Err(DbError::Semantic("division by zero".into()));
        }
        let out = match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            Mod => a % b,
            _ => unreachable!(),
        };
        return Ok(Value::Double(out));
    }

    let (a, b) = (
        l.as_i64()
            .ok_or_else(|| DbError::Semantic(format!("{l} is not numeric")))?,
        r.as_i64()
            .ok_or_else(|| DbError::Semantic(format!("{r} is not numeric")))?,
    );
    if matches!(op, Div | Mod) && b == 0 {
        return Err(DbError::Semantic("division by zero".into()));
    }
    let out = match op {
        Add => a.checked_add(b),
        Sub => a.checked_sub(b),
        Mul => a.checked_mul(b),
        Div => a.checked_div(b),
        Mod => a.checked_rem(b),
        _ => unreachable!(),
    }
    .ok_or_else(|| DbError::Semantic("integer overflow".into()))?;

    // Stay in INTEGER when both inputs were and the result fits.
    let narrow = matches!(l, Value::Integer(_)) && matches!(r, Value::Integer(_));
    if narrow {
        if let Ok(v) = i32::try_from(out) {
            return Ok(Value::Integer(v));
        }
    }
    Ok(Value::BigInt(out))
}
