//! SQL surface behavior: aggregates, joins, DISTINCT/HAVING/LIMIT,
//! indexes, constraints, and the statement/transaction error policy.

use testsupport::prelude::*;
use types::Value;

#[test]
fn aggregate_semantics_over_nulls_and_empties() {
    let db = TestDb::new();
    db.run("CREATE TABLE m (grp VARCHAR(2), x INT)");
    db.run("INSERT INTO m VALUES ('a', 1), ('a', NULL), ('b', 4), ('b', 6)");

    let result = db.run(
        "SELECT grp, COUNT(*), COUNT(x), SUM(x), AVG(x), MIN(x), MAX(x) \
         FROM m GROUP BY grp ORDER BY grp",
    );
    assert_rows(
        &result,
        &[
            vec![text("a"), big(2), big(1), big(1), dbl(1.0), int(1), int(1)],
            vec![text("b"), big(2), big(2), big(10), dbl(5.0), int(4), int(6)],
        ],
    );

    // Empty input: COUNT 0, everything else NULL.
    db.run("CREATE TABLE empty_t (x INT)");
    let result = db.run("SELECT COUNT(*), SUM(x), AVG(x), MIN(x), MAX(x) FROM empty_t");
    assert_rows(
        &result,
        &[vec![big(0), Value::Null, Value::Null, Value::Null, Value::Null]],
    );
}

#[test]
fn having_filters_groups() {
    let db = TestDb::new();
    db.run("CREATE TABLE o (status VARCHAR(4), amount INT)");
    db.run("INSERT INTO o VALUES ('a', 10), ('a', 20), ('b', 5), ('c', 50)");

    let result = db.run(
        "SELECT status, SUM(amount) FROM o GROUP BY status \
         HAVING COUNT(*) > 1 OR SUM(amount) > 40 ORDER BY status",
    );
    assert_rows(
        &result,
        &[vec![text("a"), big(30)], vec![text("c"), big(50)]],
    );
}

#[test]
fn distinct_and_limit() {
    let db = TestDb::new();
    db.run("CREATE TABLE d (x INT)");
    db.run("INSERT INTO d VALUES (2), (1), (2), (3), (1)");

    let result = db.run("SELECT DISTINCT x FROM d ORDER BY x");
    assert_rows(&result, &[vec![int(1)], vec![int(2)], vec![int(3)]]);

    let result = db.run("SELECT x FROM d ORDER BY x LIMIT 2");
    assert_rows(&result, &[vec![int(1)], vec![int(1)]]);
}

#[test]
fn left_outer_join_pads_missing_matches() {
    let db = TestDb::new();
    db.run("CREATE TABLE u (id INT, name VARCHAR(8))");
    db.run("CREATE TABLE o (uid INT, total INT)");
    db.run("INSERT INTO u VALUES (1, 'x'), (2, 'y')");
    db.run("INSERT INTO o VALUES (1, 7)");

    let result = db.run(
        "SELECT u.name, o.total FROM u LEFT JOIN o ON u.id = o.uid ORDER BY u.name",
    );
    assert_rows(
        &result,
        &[vec![text("x"), int(7)], vec![text("y"), Value::Null]],
    );
}

#[test]
fn non_equi_join_works_via_nested_loop() {
    let db = TestDb::new();
    db.run("CREATE TABLE a (x INT)");
    db.run("CREATE TABLE b (y INT)");
    db.run("INSERT INTO a VALUES (1), (2)");
    db.run("INSERT INTO b VALUES (1), (2)");

    let result = db.run("SELECT a.x, b.y FROM a JOIN b ON a.x < b.y ORDER BY a.x, b.y");
    assert_rows(&result, &[vec![int(1), int(2)]]);
}

#[test]
fn expressions_in_projection_and_where() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (a INT, b INT)");
    db.run("INSERT INTO t VALUES (3, 4), (10, NULL)");

    let result = db.run("SELECT a + b AS s, a * 2 FROM t WHERE b IS NOT NULL");
    assert_eq!(result.column_names, vec!["s".to_string(), "a * 2".to_string()]);
    assert_rows(&result, &[vec![int(7), int(6)]]);

    // Unknown predicate excludes the NULL row without erroring.
    let result = db.run("SELECT a FROM t WHERE b > 0");
    assert_rows(&result, &[vec![int(3)]]);
}

#[test]
fn secondary_index_built_over_existing_rows() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT, v VARCHAR(8))");
    for i in 0..200 {
        db.run(&format!("INSERT INTO t VALUES ({i}, 'v{i}')"));
    }
    db.run("CREATE INDEX idx_t_id ON t (id)");

    assert_rows(
        &db.run("SELECT v FROM t WHERE id = 150"),
        &[vec![text("v150")]],
    );
    // Range predicates ride the same index.
    let result = db.run("SELECT id FROM t WHERE id > 196 ORDER BY id");
    assert_rows(&result, &[vec![int(197)], vec![int(198)], vec![int(199)]]);

    // Overlapping bounds on the indexed column all apply, whichever one
    // became the scan bound.
    let result = db.run("SELECT id FROM t WHERE id > 3 AND id > 196 ORDER BY id");
    assert_rows(&result, &[vec![int(197)], vec![int(198)], vec![int(199)]]);
    let result = db.run("SELECT id FROM t WHERE id = 150 AND id > 120");
    assert_rows(&result, &[vec![int(150)]]);
    assert_rows(&db.run("SELECT id FROM t WHERE id = 5 AND id = 6"), &[]);

    db.run("DROP INDEX idx_t_id");
    assert_rows(
        &db.run("SELECT v FROM t WHERE id = 150"),
        &[vec![text("v150")]],
    );
}

#[test]
fn index_stays_consistent_under_update_and_delete() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT PRIMARY KEY, v VARCHAR(32))");
    db.run("INSERT INTO t VALUES (1, 'one'), (2, 'two'), (3, 'three')");

    // Key change moves the index entry.
    db.run("UPDATE t SET id = 10 WHERE id = 1");
    assert_rows(&db.run("SELECT v FROM t WHERE id = 10"), &[vec![text("one")]]);
    assert_rows(&db.run("SELECT v FROM t WHERE id = 1"), &[]);

    db.run("DELETE FROM t WHERE id = 2");
    assert_rows(&db.run("SELECT v FROM t WHERE id = 2"), &[]);
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(2)]]);
}

#[test]
fn primary_key_rejects_duplicates() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT PRIMARY KEY, v INT)");
    db.run("INSERT INTO t VALUES (1, 10)");

    let message = db.run_err("INSERT INTO t VALUES (1, 20)");
    assert!(message.contains("constraint"), "{message}");
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(1)]]);
}

#[test]
fn not_null_and_varchar_length_are_enforced() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT NOT NULL, v VARCHAR(4))");

    let message = db.run_err("INSERT INTO t VALUES (NULL, 'ok')");
    assert!(message.contains("NOT NULL"), "{message}");

    let message = db.run_err("INSERT INTO t VALUES (1, 'too-long')");
    assert!(message.contains("too long"), "{message}");
}

#[test]
fn unique_column_is_enforced() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT, email VARCHAR(32) UNIQUE)");
    db.run("INSERT INTO t VALUES (1, 'a@example.com')");
    db.run("INSERT INTO t VALUES (2, NULL), (3, NULL)");

    let message = db.run_err("INSERT INTO t VALUES (4, 'a@example.com')");
    assert!(message.contains("unique"), "{message}");
}

#[test]
fn syntax_errors_leave_the_transaction_alive() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT)");

    let mut session = db.engine().session();
    assert!(session.execute("BEGIN").ok);
    assert!(session.execute("INSERT INTO t VALUES (1)").ok);

    let bad = session.execute("SELEC broken");
    assert!(!bad.ok);
    assert!(session.in_transaction(), "syntax error must not abort");

    let bad = session.execute("SELECT ghost FROM t");
    assert!(!bad.ok);
    assert!(session.in_transaction(), "semantic error must not abort");

    assert!(session.execute("COMMIT").ok);
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(1)]]);
}

#[test]
fn constraint_errors_abort_the_transaction() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT PRIMARY KEY)");
    db.run("INSERT INTO t VALUES (1)");

    let mut session = db.engine().session();
    assert!(session.execute("BEGIN").ok);
    assert!(session.execute("INSERT INTO t VALUES (2)").ok);

    let dup = session.execute("INSERT INTO t VALUES (1)");
    assert!(!dup.ok);
    assert!(
        !session.in_transaction(),
        "constraint violation aborts the transaction"
    );

    // The pre-violation insert rolled back with the transaction.
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(1)]]);
}

#[test]
fn multi_row_insert_with_column_list_defaults_nulls() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT, v VARCHAR(8), flag BOOLEAN)");
    let result = db.run("INSERT INTO t (v, id) VALUES ('a', 1), ('b', 2)");
    assert_eq!(result.rows_affected, 2);

    let rows = db.query("SELECT id, v, flag FROM t ORDER BY id");
    assert_eq!(
        rows,
        vec![
            vec![int(1), text("a"), Value::Null],
            vec![int(2), text("b"), Value::Null],
        ]
    );
}

#[test]
fn drop_table_forgets_data_and_allows_recreate() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT)");
    db.run("INSERT INTO t VALUES (1)");
    db.run("DROP TABLE t");

    let message = db.run_err("SELECT * FROM t");
    assert!(message.contains("unknown table"), "{message}");

    db.run("CREATE TABLE t (id INT, v INT)");
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(0)]]);
}

#[test]
fn update_that_grows_rows_keeps_them_queryable() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT, v VARCHAR(600))");
    db.run("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c')");

    // Much larger payloads force relocation to fresh RIDs.
    let long = "x".repeat(500);
    let result = db.run(&format!("UPDATE t SET v = '{long}'"));
    assert_eq!(result.rows_affected, 3);

    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(3)]]);
    let rows = db.query("SELECT id FROM t ORDER BY id");
    assert_eq!(rows, vec![vec![int(1)], vec![int(2)], vec![int(3)]]);
}

#[test]
fn booleans_and_doubles_round_trip() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (ok BOOLEAN, score DOUBLE, at TIMESTAMP)");
    db.run("INSERT INTO t VALUES (TRUE, 1.5, 1700000000000000)");

    let rows = db.query("SELECT ok, score, at FROM t");
    assert_eq!(
        rows,
        vec![vec![
            Value::Boolean(true),
            dbl(1.5),
            Value::Timestamp(1_700_000_000_000_000)
        ]]
    );

    assert_rows(&db.run("SELECT score FROM t WHERE ok"), &[vec![dbl(1.5)]]);
}

#[test]
fn for_system_time_is_parsed_but_not_executable() {
    let db = TestDb::new();
    db.run("CREATE TABLE t (id INT)");
    let message = db.run_err("SELECT * FROM t FOR SYSTEM_TIME AS OF TX 3");
    assert!(message.contains("SYSTEM_TIME"), "{message}");
}
