use super::*;
use common::Tuple;
use pretty_assertions::assert_eq;
use types::Value;

fn schema() -> Vec<String> {
    vec!["id".into(), "name".into(), "u.age".into()]
}

fn row(values: Vec<Value>) -> Tuple {
    Tuple::new(values)
}

fn ctx_eval(expr: &Expr, tuple: &Tuple) -> Value {
    let schema = schema();
    EvalContext::new(&schema).eval(expr, tuple).unwrap()
}

#[test]
fn column_resolution_qualified_and_suffix() {
    let schema = schema();
    let ctx = EvalContext::new(&schema);
    assert_eq!(ctx.resolve(None, "id").unwrap(), 0);
    assert_eq!(ctx.resolve(None, "age").unwrap(), 2);
    assert_eq!(ctx.resolve(Some("u"), "age").unwrap(), 2);
    assert!(ctx.resolve(Some("v"), "age").is_err());
    assert!(ctx.resolve(None, "ghost").is_err());
}

#[test]
fn comparison_with_null_is_unknown() {
    let t = row(vec![Value::Null, Value::Varchar("a".into()), Value::Integer(3)]);
    let expr = Expr::binary(Expr::column("id"), BinaryOp::Eq, Expr::Literal(Value::Integer(1)));
    assert_eq!(ctx_eval(&expr, &t), Value::Null);

    // And the predicate form excludes the row.
    let schema = schema();
    assert!(!EvalContext::new(&schema).eval_predicate(&expr, &t).unwrap());
}

#[test]
fn kleene_logic_tables() {
    let t = row(vec![Value::Integer(1), Value::Null, Value::Integer(3)]);
    let null = Expr::binary(
        Expr::column("name"),
        BinaryOp::Eq,
        Expr::Literal(Value::Varchar("x".into())),
    );
    let tru = Expr::Literal(Value::Boolean(true));
    let fls = Expr::Literal(Value::Boolean(false));

    assert_eq!(
        ctx_eval(&Expr::binary(fls.clone(), BinaryOp::And, null.clone()), &t),
        Value::Boolean(false)
    );
    assert_eq!(
        ctx_eval(&Expr::binary(tru.clone(), BinaryOp::And, null.clone()), &t),
        Value::Null
    );
    assert_eq!(
        ctx_eval(&Expr::binary(tru, BinaryOp::Or, null.clone()), &t),
        Value::Boolean(true)
    );
    assert_eq!(
        ctx_eval(&Expr::binary(fls, BinaryOp::Or, null.clone()), &t),
        Value::Null
    );
    assert_eq!(
        ctx_eval(
            &Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(null)
            },
            &t
        ),
        Value::Null
    );
}

#[test]
fn is_null_predicate() {
    let t = row(vec![Value::Null, Value::Varchar("a".into()), Value::Integer(3)]);
    assert_eq!(
        ctx_eval(
            &Expr::IsNull {
                expr: Box::new(Expr::column("id")),
                negated: false
            },
            &t
        ),
        Value::Boolean(true)
    );
    assert_eq!(
        ctx_eval(
            &Expr::IsNull {
                expr: Box::new(Expr::column("name")),
                negated: true
            },
            &t
        ),
        Value::Boolean(true)
    );
}

#[test]
fn arithmetic_promotion() {
    let t = row(vec![Value::Integer(7), Value::Null, Value::Integer(2)]);
    let add = Expr::binary(Expr::column("id"), BinaryOp::Add, Expr::column("age"));
    assert_eq!(ctx_eval(&add, &t), Value::Integer(9));

    let div = Expr::binary(
        Expr::column("id"),
        BinaryOp::Div,
        Expr::Literal(Value::Double(2.0)),
    );
    assert_eq!(ctx_eval(&div, &t), Value::Double(3.5));
}

#[test]
fn division_by_zero_errors() {
    let schema = schema();
    let t = row(vec![Value::Integer(7), Value::Null, Value::Integer(0)]);
    let div = Expr::binary(Expr::column("id"), BinaryOp::Div, Expr::column("age"));
    let err = EvalContext::new(&schema).eval(&div, &t).unwrap_err();
    assert!(matches!(err, common::DbError::Semantic(_)));
}

#[test]
fn integer_overflow_widens_to_bigint() {
    let t = row(vec![Value::Integer(i32::MAX), Value::Null, Value::Integer(1)]);
    let add = Expr::binary(Expr::column("id"), BinaryOp::Add, Expr::column("age"));
    assert_eq!(ctx_eval(&add, &t), Value::BigInt(i32::MAX as i64 + 1));
}

#[test]
fn count_star_counts_nulls_too() {
    let mut acc = AggAccumulator::new(AggFunc::CountStar);
    for v in [Value::Integer(1), Value::Null, Value::Integer(3)] {
        acc.update(&v).unwrap();
    }
    assert_eq!(acc.finish(), Value::BigInt(3));

    let mut acc = AggAccumulator::new(AggFunc::Count);
    for v in [Value::Integer(1), Value::Null, Value::Integer(3)] {
        acc.update(&v).unwrap();
    }
    assert_eq!(acc.finish(), Value::BigInt(2));
}

#[test]
fn sum_and_avg_skip_nulls() {
    let mut sum = AggAccumulator::new(AggFunc::Sum);
    let mut avg = AggAccumulator::new(AggFunc::Avg);
    for v in [Value::Integer(10), Value::Null, Value::Integer(20)] {
        sum.update(&v).unwrap();
        avg.update(&v).unwrap();
    }
    assert_eq!(sum.finish(), Value::BigInt(30));
    assert_eq!(avg.finish(), Value::Double(15.0));
}

#[test]
fn empty_aggregates() {
    assert_eq!(AggAccumulator::new(AggFunc::CountStar).finish(), Value::BigInt(0));
    assert_eq!(AggAccumulator::new(AggFunc::Sum).finish(), Value::Null);
    assert_eq!(AggAccumulator::new(AggFunc::Avg).finish(), Value::Null);
    assert_eq!(AggAccumulator::new(AggFunc::Min).finish(), Value::Null);
}

#[test]
fn min_max_use_value_comparison() {
    let mut min = AggAccumulator::new(AggFunc::Min);
    let mut max = AggAccumulator::new(AggFunc::Max);
    for v in [Value::Integer(5), Value::Integer(-3), Value::Null, Value::Integer(9)] {
        min.update(&v).unwrap();
        max.update(&v).unwrap();
    }
    assert_eq!(min.finish(), Value::Integer(-3));
    assert_eq!(max.finish(), Value::Integer(9));
}

#[test]
fn sum_goes_double_when_any_input_is() {
    let mut sum = AggAccumulator::new(AggFunc::Sum);
    sum.update(&Value::Integer(1)).unwrap();
    sum.update(&Value::Double(0.5)).unwrap();
    assert_eq!(sum.finish(), Value::Double(1.5));
}

#[test]
fn display_labels() {
    let e = Expr::Aggregate {
        func: AggFunc::Sum,
        arg: Some(Box::new(Expr::column("amount"))),
    };
    assert_eq!(e.to_string(), "SUM(amount)");
    assert_eq!(
        Expr::Aggregate { func: AggFunc::CountStar, arg: None }.to_string(),
        "COUNT(*)"
    );
}
