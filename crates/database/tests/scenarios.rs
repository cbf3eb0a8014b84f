//! The literal end-to-end scenarios: CRUD round trip, update, rollback,
//! commit, aggregation, join, and crash recovery.

use testsupport::prelude::*;

fn seed_t(db: &TestDb) {
    db.run("CREATE TABLE t (id INT, name VARCHAR(10))");
    db.run("INSERT INTO t VALUES (1, 'a'), (2, 'b')");
}

#[test]
fn s1_crud_round_trip() {
    let db = TestDb::new();
    seed_t(&db);

    let result = db.run("SELECT * FROM t ORDER BY id");
    assert_rows(
        &result,
        &[vec![int(1), text("a")], vec![int(2), text("b")]],
    );
}

#[test]
fn s2_update_where() {
    let db = TestDb::new();
    seed_t(&db);

    let update = db.run("UPDATE t SET name = 'z' WHERE id = 1");
    assert_eq!(update.rows_affected, 1);

    let result = db.run("SELECT name FROM t WHERE id = 1");
    assert_rows(&result, &[vec![text("z")]]);
}

#[test]
fn s3_rollback_discards_insert() {
    let db = TestDb::new();
    seed_t(&db);

    let mut session = db.engine().session();
    assert!(session.execute("BEGIN").ok);
    assert!(session.execute("INSERT INTO t VALUES (3, 'c')").ok);
    assert!(session.execute("ROLLBACK").ok);

    let result = db.run("SELECT COUNT(*) FROM t");
    assert_rows(&result, &[vec![big(2)]]);
}

#[test]
fn s4_commit_persists_across_restart() {
    let mut db = TestDb::new();
    seed_t(&db);

    let mut session = db.engine().session();
    assert!(session.execute("BEGIN").ok);
    assert!(session.execute("INSERT INTO t VALUES (3, 'c')").ok);
    assert!(session.execute("COMMIT").ok);
    drop(session);

    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(3)]]);

    db.restart_clean();
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(3)]]);
}

#[test]
fn s5_group_by_aggregate() {
    let db = TestDb::new();
    db.run("CREATE TABLE orders (status VARCHAR(4), amount INT)");
    db.run("INSERT INTO orders VALUES ('a', 10), ('a', 20), ('b', 5)");

    let result =
        db.run("SELECT status, SUM(amount) FROM orders GROUP BY status ORDER BY status");
    assert_rows(
        &result,
        &[vec![text("a"), big(30)], vec![text("b"), big(5)]],
    );
}

#[test]
fn s6_join_orders_by_name_then_total() {
    let db = TestDb::new();
    db.run("CREATE TABLE u (id INT, name VARCHAR(8))");
    db.run("CREATE TABLE o (uid INT, total INT)");
    db.run("INSERT INTO u VALUES (1, 'x'), (2, 'y')");
    db.run("INSERT INTO o VALUES (1, 7), (2, 9), (1, 3)");

    let result = db.run(
        "SELECT u.name, o.total FROM u JOIN o ON u.id = o.uid ORDER BY u.name, o.total",
    );
    assert_rows(
        &result,
        &[
            vec![text("x"), int(3)],
            vec![text("x"), int(7)],
            vec![text("y"), int(9)],
        ],
    );
}

#[test]
fn s7_crash_after_commit_recovers_the_insert() {
    let mut db = TestDb::new();
    seed_t(&db);

    let mut session = db.engine().session();
    assert!(session.execute("BEGIN").ok);
    assert!(session.execute("INSERT INTO t VALUES (3, 'c')").ok);
    assert!(session.execute("COMMIT").ok);
    drop(session);

    // Crash without flushing any data pages: the commit lives only in
    // the WAL and must be redone at reopen.
    db.restart();
    assert_rows(&db.run("SELECT COUNT(*) FROM t"), &[vec![big(3)]]);
    assert_rows(
        &db.run("SELECT name FROM t WHERE id = 3"),
        &[vec![text("c")]],
    );
}
