//! Property suites over the full engine: ordering, round-trips, and
//! count consistency for arbitrary inputs.

use proptest::prelude::*;
use testsupport::prelude::*;
use types::Value;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn order_by_returns_sorted_rows(values in proptest::collection::vec(any::<i32>(), 0..60)) {
        let db = TestDb::new();
        db.run("CREATE TABLE p (x INT)");
        for v in &values {
            db.run(&format!("INSERT INTO p VALUES ({v})"));
        }

        let rows = db.query("SELECT x FROM p ORDER BY x");
        let got: Vec<i32> = rows
            .iter()
            .map(|r| match r[0] {
                Value::Integer(v) => v,
                ref other => panic!("unexpected value {other:?}"),
            })
            .collect();
        let mut expected = values.clone();
        expected.sort();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn count_tracks_inserts_and_deletes(n in 0usize..40, delete_below in any::<i32>()) {
        let db = TestDb::new();
        db.run("CREATE TABLE p (x INT)");
        let values: Vec<i32> = (0..n as i32).collect();
        for v in &values {
            db.run(&format!("INSERT INTO p VALUES ({v})"));
        }
        db.run(&format!("DELETE FROM p WHERE x < {delete_below}"));

        let expected = values.iter().filter(|&&v| v >= delete_below).count() as i64;
        let rows = db.query("SELECT COUNT(*) FROM p");
        prop_assert_eq!(&rows[0][0], &Value::BigInt(expected));
    }

    #[test]
    fn varchar_round_trips_through_sql(s in "[a-zA-Z0-9 ']{0,24}") {
        let db = TestDb::new();
        db.run("CREATE TABLE p (v VARCHAR(32))");
        let escaped = s.replace('\'', "''");
        db.run(&format!("INSERT INTO p VALUES ('{escaped}')"));

        let rows = db.query("SELECT v FROM p");
        prop_assert_eq!(&rows[0][0], &Value::Varchar(s.clone()));
    }

    #[test]
    fn indexed_point_lookup_agrees_with_scan(values in proptest::collection::vec(0i32..50, 1..40)) {
        let db = TestDb::new();
        db.run("CREATE TABLE p (x INT)");
        for v in &values {
            db.run(&format!("INSERT INTO p VALUES ({v})"));
        }
        db.run("CREATE INDEX idx_p_x ON p (x)");

        let probe = values[0];
        let rows = db.query(&format!("SELECT COUNT(*) FROM p WHERE x = {probe}"));
        let expected = values.iter().filter(|&&v| v == probe).count() as i64;
        prop_assert_eq!(&rows[0][0], &Value::BigInt(expected));
    }
}
