use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// SQL column types supported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Varchar,
    Timestamp,
}

impl SqlType {
    /// On-disk tag byte used by the catalog page.
    pub fn tag(self) -> u8 {
        match self {
            SqlType::Boolean => 1,
            SqlType::Integer => 2,
            SqlType::BigInt => 3,
            SqlType::Double => 4,
            SqlType::Varchar => 5,
            SqlType::Timestamp => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => SqlType::Boolean,
            2 => SqlType::Integer,
            3 => SqlType::BigInt,
            4 => SqlType::Double,
            5 => SqlType::Varchar,
            6 => SqlType::Timestamp,
            _ => return None,
        })
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Varchar => "VARCHAR",
            SqlType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

/// Runtime value: a tagged union over the SQL types plus NULL.
///
/// `Timestamp` carries microseconds since the Unix epoch.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Varchar(String),
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The SQL type of this value; `None` for NULL.
    pub fn sql_type(&self) -> Option<SqlType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => SqlType::Boolean,
            Value::Integer(_) => SqlType::Integer,
            Value::BigInt(_) => SqlType::BigInt,
            Value::Double(_) => SqlType::Double,
            Value::Varchar(_) => SqlType::Varchar,
            Value::Timestamp(_) => SqlType::Timestamp,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view used for cross-width comparison and arithmetic promotion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::BigInt(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Three-valued comparison: `None` when either side is NULL or the
    /// types are incomparable. Integer widths and doubles coerce.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Varchar(a), Varchar(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (BigInt(a), BigInt(b)) => Some(a.cmp(b)),
            (Integer(a), BigInt(b)) => Some((*a as i64).cmp(b)),
            (BigInt(a), Integer(b)) => Some(a.cmp(&(*b as i64))),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Double(_), Integer(_) | BigInt(_)) | (Integer(_) | BigInt(_), Double(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => None,
        }
    }

    /// Three-valued equality; `None` means unknown.
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        self.compare(other).map(|ord| ord == Ordering::Equal)
    }

    /// Total order used by sort and index keys: NULL first, then by value.
    /// Cross-type falls back to type-tag order so sorting never panics.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        if let (Value::Double(a), Value::Double(b)) = (self, other) {
            return a.total_cmp(b);
        }
        self.discriminant().cmp(&other.discriminant())
    }

    fn discriminant(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::BigInt(_) => 3,
            Value::Double(_) => 4,
            Value::Varchar(_) => 5,
            Value::Timestamp(_) => 6,
        }
    }
}

// Equality for grouping and hash-join keys. Doubles compare bitwise here so
// that hashing stays consistent; SQL `=` goes through `sql_eq` instead.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Varchar(a), Varchar(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Varchar(s) => s.hash(state),
            Value::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Varchar(s) => f.write_str(s),
            Value::Timestamp(v) => write!(f, "{v}"),
        }
    }
}
