use super::*;
use expr::{AggFunc, BinaryOp, Expr};
use pretty_assertions::assert_eq;
use types::{SqlType, Value};

fn parse_one(sql: &str) -> Statement {
    let mut stmts = parse_sql(sql).unwrap();
    assert_eq!(stmts.len(), 1, "expected one statement from {sql}");
    stmts.remove(0)
}

fn select_of(sql: &str) -> SelectStatement {
    match parse_one(sql) {
        Statement::Select(select) => select,
        other => panic!("expected SELECT, got {other:?}"),
    }
}

#[test]
fn create_table_with_constraints() {
    let stmt = parse_one(
        "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(32) NOT NULL, bio VARCHAR(200), active BOOLEAN UNIQUE)",
    );
    let Statement::CreateTable { name, columns } = stmt else {
        panic!("wrong statement");
    };
    assert_eq!(name, "users");
    assert_eq!(columns.len(), 4);
    assert!(columns[0].primary_key && !columns[0].nullable);
    assert_eq!(columns[1].ty, SqlType::Varchar);
    assert_eq!(columns[1].declared_len, 32);
    assert!(!columns[1].nullable);
    assert!(columns[2].nullable);
    assert!(columns[3].unique && !columns[3].primary_key);
}

#[test]
fn create_table_with_table_level_pk() {
    let stmt = parse_one("CREATE TABLE t (a INT, b INT, PRIMARY KEY (a, b))");
    let Statement::CreateTable { columns, .. } = stmt else {
        panic!("wrong statement");
    };
    assert!(columns[0].primary_key && columns[1].primary_key);
}

#[test]
fn duplicate_pk_declarations_error() {
    let err = parse_sql("CREATE TABLE t (a INT PRIMARY KEY, PRIMARY KEY (a))").unwrap_err();
    assert!(matches!(err, common::DbError::Syntax(_)));
}

#[test]
fn insert_multi_row_with_columns() {
    let stmt = parse_one("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'it''s')");
    let Statement::Insert {
        table,
        columns,
        rows,
    } = stmt
    else {
        panic!("wrong statement");
    };
    assert_eq!(table, "t");
    assert_eq!(columns, Some(vec!["id".into(), "name".into()]));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][1], Expr::Literal(Value::Varchar("it's".into())));
}

#[test]
fn select_full_clause_order() {
    let select = select_of(
        "SELECT status, SUM(amount) AS total FROM orders WHERE amount > 0 \
         GROUP BY status HAVING COUNT(*) > 1 ORDER BY status DESC LIMIT 10",
    );
    assert_eq!(select.items.len(), 2);
    assert!(matches!(
        &select.items[1],
        SelectItem::Expr { alias: Some(a), .. } if a == "total"
    ));
    assert!(select.selection.is_some());
    assert_eq!(select.group_by.len(), 1);
    assert!(select.having.is_some());
    assert_eq!(select.order_by.len(), 1);
    assert!(select.order_by[0].desc);
    assert_eq!(select.limit, Some(10));
}

#[test]
fn select_with_joins_and_aliases() {
    let select = select_of(
        "SELECT u.name, o.total FROM users u \
         JOIN orders o ON u.id = o.uid \
         LEFT OUTER JOIN refunds AS r ON o.id = r.order_id",
    );
    assert_eq!(select.from.name, "users");
    assert_eq!(select.from.alias.as_deref(), Some("u"));
    assert_eq!(select.joins.len(), 2);
    assert_eq!(select.joins[0].join_type, JoinType::Inner);
    assert_eq!(select.joins[1].join_type, JoinType::LeftOuter);
    assert_eq!(select.joins[1].table.alias.as_deref(), Some("r"));
}

#[test]
fn select_for_system_time() {
    let select = select_of("SELECT * FROM t FOR SYSTEM_TIME AS OF TX 42 WHERE id = 1");
    assert_eq!(select.as_of_tx, Some(42));
    assert!(select.selection.is_some());
}

#[test]
fn distinct_and_wildcard() {
    let select = select_of("SELECT DISTINCT * FROM t");
    assert!(select.distinct);
    assert_eq!(select.items, vec![SelectItem::Wildcard]);
}

#[test]
fn expression_precedence() {
    let select = select_of("SELECT * FROM t WHERE a + 1 * 2 = 3 AND NOT b OR c < 4");
    // ((a + (1*2) = 3) AND (NOT b)) OR (c < 4)
    let Some(Expr::Binary { op: BinaryOp::Or, left, .. }) = select.selection else {
        panic!("top must be OR");
    };
    let Expr::Binary { op: BinaryOp::And, left: eq, .. } = *left else {
        panic!("left of OR must be AND");
    };
    let Expr::Binary { op: BinaryOp::Eq, left: add, .. } = *eq else {
        panic!("left of AND must be =");
    };
    let Expr::Binary { op: BinaryOp::Add, right: mul, .. } = *add else {
        panic!("left of = must be +");
    };
    assert!(matches!(*mul, Expr::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn aggregates_parse() {
    let select = select_of("SELECT COUNT(*), COUNT(x), MIN(a), MAX(b), AVG(c) FROM t");
    let funcs: Vec<AggFunc> = select
        .items
        .iter()
        .map(|item| match item {
            SelectItem::Expr {
                expr: Expr::Aggregate { func, .. },
                ..
            } => *func,
            other => panic!("expected aggregate, got {other:?}"),
        })
        .collect();
    assert_eq!(
        funcs,
        vec![
            AggFunc::CountStar,
            AggFunc::Count,
            AggFunc::Min,
            AggFunc::Max,
            AggFunc::Avg
        ]
    );
}

#[test]
fn update_and_delete() {
    let stmt = parse_one("UPDATE t SET name = 'z', n = n + 1 WHERE id = 1");
    let Statement::Update { assignments, selection, .. } = stmt else {
        panic!("wrong statement");
    };
    assert_eq!(assignments.len(), 2);
    assert!(selection.is_some());

    let stmt = parse_one("DELETE FROM t WHERE id = 2");
    assert!(matches!(stmt, Statement::Delete { selection: Some(_), .. }));
}

#[test]
fn transaction_control() {
    assert_eq!(parse_one("BEGIN"), Statement::Begin);
    assert_eq!(parse_one("BEGIN TRANSACTION"), Statement::Begin);
    assert_eq!(parse_one("COMMIT"), Statement::Commit);
    assert_eq!(parse_one("ROLLBACK"), Statement::Rollback);
}

#[test]
fn multiple_statements_split_on_semicolons() {
    let stmts = parse_sql("BEGIN; INSERT INTO t VALUES (1); COMMIT;").unwrap();
    assert_eq!(stmts.len(), 3);
}

#[test]
fn literals() {
    let select = select_of(
        "SELECT * FROM t WHERE a = 2147483648 AND b = 1.5 AND c = TRUE AND d IS NOT NULL AND e = NULL",
    );
    let rendered = format!("{}", select.selection.unwrap());
    assert!(rendered.contains("2147483648"));
    assert!(rendered.contains("1.5"));
    assert!(rendered.contains("TRUE"));
    assert!(rendered.contains("IS NOT NULL"));
}

#[test]
fn quoted_identifiers_keep_case() {
    let select = select_of("SELECT \"Weird Name\" FROM \"MyTable\"");
    assert_eq!(select.from.name, "MyTable");
    assert!(matches!(
        &select.items[0],
        SelectItem::Expr { expr: Expr::Column { name, .. }, .. } if name == "Weird Name"
    ));
}

#[test]
fn syntax_errors_are_reported_not_panicked() {
    for bad in [
        "SELEC * FROM t",
        "SELECT FROM t",
        "CREATE TABLE t",
        "INSERT INTO t VALUES",
        "SELECT * FROM t WHERE",
        "CREATE TABLE t (a FANCYTYPE)",
        "SELECT * FROM t LIMIT 'x'",
        "UPDATE t SET",
        "'unterminated",
    ] {
        let err = parse_sql(bad).unwrap_err();
        assert!(
            matches!(err, common::DbError::Syntax(_) | common::DbError::Semantic(_)),
            "{bad} should fail with a syntax error, got {err:?}"
        );
    }
}

#[test]
fn unknown_function_is_rejected() {
    let err = parse_sql("SELECT FANCY(x) FROM t").unwrap_err();
    assert!(matches!(err, common::DbError::Syntax(_)));
}
