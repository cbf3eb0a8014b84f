use super::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use types::{SqlType, Value};

fn orders_schema() -> Schema {
    Schema::try_new(vec![
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("status", SqlType::Varchar).with_len(16),
        Column::new("amount", SqlType::Double),
        Column::new("placed_at", SqlType::Timestamp),
    ])
    .unwrap()
}

#[test]
fn column_lookup_is_case_insensitive() {
    let schema = orders_schema();
    assert_eq!(schema.column_index("id").unwrap(), 0);
    assert_eq!(schema.column_index("STATUS").unwrap(), 1);
    assert_eq!(schema.column_index("Amount").unwrap(), 2);
    assert!(matches!(
        schema.column_index("missing"),
        Err(DbError::Semantic(_))
    ));
}

#[test]
fn schema_rejects_duplicate_columns() {
    let err = Schema::try_new(vec![
        Column::new("a", SqlType::Integer),
        Column::new("A", SqlType::Integer),
    ])
    .unwrap_err();
    assert!(matches!(err, DbError::Semantic(_)));
}

#[test]
fn primary_key_ordinals() {
    let schema = orders_schema();
    assert_eq!(schema.primary_key(), vec![0]);
}

#[test]
fn tuple_round_trip_with_nulls() {
    let schema = orders_schema();
    let tuple = Tuple::new(vec![
        Value::Integer(7),
        Value::Null,
        Value::Double(19.5),
        Value::Timestamp(1_700_000_000_000_000),
    ]);

    let bytes = tuple.serialize(&schema).unwrap();
    let back = Tuple::deserialize(&bytes, &schema).unwrap();
    assert_eq!(back.values, tuple.values);
}

#[test]
fn tuple_serialize_rejects_arity_mismatch() {
    let schema = orders_schema();
    let tuple = Tuple::new(vec![Value::Integer(1)]);
    assert!(tuple.serialize(&schema).is_err());
}

#[test]
fn tuple_deserialize_rejects_truncated_bytes() {
    let schema = orders_schema();
    let tuple = Tuple::new(vec![
        Value::Integer(1),
        Value::Varchar("paid".into()),
        Value::Double(1.0),
        Value::Timestamp(0),
    ]);
    let bytes = tuple.serialize(&schema).unwrap();
    let err = Tuple::deserialize(&bytes[..4], &schema).unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
}

#[test]
fn error_exit_codes() {
    assert_eq!(DbError::Syntax("x".into()).exit_code(), 1);
    assert_eq!(
        DbError::Io(std::io::Error::other("disk gone")).exit_code(),
        2
    );
    assert_eq!(DbError::Corruption("bad page".into()).exit_code(), 3);
}

#[test]
fn abort_policy_per_kind() {
    assert!(DbError::Constraint("pk".into()).aborts_txn());
    assert!(DbError::Conflict("deadlock".into()).aborts_txn());
    assert!(!DbError::Syntax("bad".into()).aborts_txn());
    assert!(!DbError::NotFound("rid".into()).aborts_txn());
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i32>().prop_map(Value::Integer),
        any::<i64>().prop_map(Value::BigInt),
        any::<f64>().prop_map(Value::Double),
        ".{0,40}".prop_map(Value::Varchar),
        any::<i64>().prop_map(Value::Timestamp),
    ]
}

proptest! {
    #[test]
    fn tuple_round_trip_any_values(
        b in proptest::option::of(any::<bool>()),
        i in proptest::option::of(any::<i32>()),
        big in proptest::option::of(any::<i64>()),
        d in proptest::option::of(any::<f64>()),
        s in proptest::option::of(".{0,64}"),
        ts in proptest::option::of(any::<i64>()),
    ) {
        let schema = Schema::try_new(vec![
            Column::new("b", SqlType::Boolean),
            Column::new("i", SqlType::Integer),
            Column::new("big", SqlType::BigInt),
            Column::new("d", SqlType::Double),
            Column::new("s", SqlType::Varchar).with_len(64),
            Column::new("ts", SqlType::Timestamp),
        ]).unwrap();

        let tuple = Tuple::new(vec![
            b.map_or(Value::Null, Value::Boolean),
            i.map_or(Value::Null, Value::Integer),
            big.map_or(Value::Null, Value::BigInt),
            d.map_or(Value::Null, Value::Double),
            s.map_or(Value::Null, Value::Varchar),
            ts.map_or(Value::Null, Value::Timestamp),
        ]);

        let bytes = tuple.serialize(&schema).unwrap();
        let back = Tuple::deserialize(&bytes, &schema).unwrap();
        prop_assert_eq!(back.values, tuple.values);
    }

    #[test]
    fn rid_ordering_matches_pair_ordering(a in any::<u32>(), b in any::<u16>(), c in any::<u32>(), d in any::<u16>()) {
        let left = Rid::new(PageId(a), b);
        let right = Rid::new(PageId(c), d);
        prop_assert_eq!(left.cmp(&right), (a, b).cmp(&(c, d)));
    }

    #[test]
    fn values_hash_consistently(v in value_strategy()) {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        v.hash(&mut h1);
        v.clone().hash(&mut h2);
        prop_assert_eq!(h1.finish(), h2.finish());
    }
}
