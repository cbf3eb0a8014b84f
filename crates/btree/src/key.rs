use common::{Column, DbError, DbResult};
use types::{SqlType, Value};

/// Fallback width for VARCHAR key columns declared without a length.
const DEFAULT_VARCHAR_WIDTH: usize = 64;

/// Turns typed key values into fixed-width byte strings whose memcmp order
/// matches value order.
///
/// Each column contributes a null flag byte (NULL sorts first) followed by
/// its encoded payload: sign-flipped big-endian integers, the IEEE-754
/// total-order trick for doubles, and zero-padded (truncated) bytes for
/// VARCHAR. Keys are compared as raw bytes and never decoded; lookups go
/// back through the heap.
#[derive(Clone, Debug)]
pub struct KeyCodec {
    columns: Vec<(SqlType, usize)>,
    key_size: usize,
}

impl KeyCodec {
    pub fn new(columns: &[Column]) -> Self {
        let columns: Vec<(SqlType, usize)> = columns
            .iter()
            .map(|c| {
                let width = match c.ty {
                    SqlType::Boolean => 1,
                    SqlType::Integer => 4,
                    SqlType::BigInt | SqlType::Double | SqlType::Timestamp => 8,
                    SqlType::Varchar => {
                        if c.declared_len == 0 {
                            DEFAULT_VARCHAR_WIDTH
                        } else {
                            c.declared_len as usize
                        }
                    }
                };
                (c.ty, width)
            })
            .collect();
        let key_size = columns.iter().map(|(_, w)| 1 + w).sum();
        Self { columns, key_size }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn encode(&self, values: &[Value]) -> DbResult<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(DbError::Internal(format!(
                "key has {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let mut out = Vec::with_capacity(self.key_size);
        for (value, &(ty, width)) in values.iter().zip(&self.columns) {
            if value.is_null() {
                out.push(0);
                out.extend(std::iter::repeat(0).take(width));
                continue;
            }
            out.push(1);
            let coerced = coerce(value, ty)?;
            match coerced {
                Value::Boolean(b) => out.push(b as u8),
                Value::Integer(v) => {
                    out.extend_from_slice(&((v as u32) ^ 0x8000_0000).to_be_bytes())
                }
                Value::BigInt(v) | Value::Timestamp(v) => {
                    out.extend_from_slice(&((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
                }
                Value::Double(v) => {
                    let bits = v.to_bits();
                    let ordered = if bits & 0x8000_0000_0000_0000 == 0 {
                        bits ^ 0x8000_0000_0000_0000
                    } else {
                        !bits
                    };
                    out.extend_from_slice(&ordered.to_be_bytes());
                }
                Value::Varchar(s) => {
                    let bytes = s.as_bytes();
                    let take = bytes.len().min(width);
                    out.extend_from_slice(&bytes[..take]);
                    out.extend(std::iter::repeat(0).take(width - take));
                }
                Value::Null => unreachable!(),
            }
        }
        debug_assert_eq!(out.len(), self.key_size);
        Ok(out)
    }
}

/// Widens or narrows a probe value to the key column's type so that
/// `WHERE int_col = 5` probes with the column's own width.
fn coerce(value: &Value, ty: SqlType) -> DbResult<Value> {
    let ok = match (value, ty) {
        (Value::Boolean(_), SqlType::Boolean)
        | (Value::Integer(_), SqlType::Integer)
        | (Value::BigInt(_), SqlType::BigInt)
        | (Value::Double(_), SqlType::Double)
        | (Value::Varchar(_), SqlType::Varchar)
        | (Value::Timestamp(_), SqlType::Timestamp) => value.clone(),
        (Value::Integer(v), SqlType::BigInt) => Value::BigInt(*v as i64),
        (Value::BigInt(v), SqlType::Integer) => {
            let narrowed = i32::try_from(*v)
                .map_err(|_| DbError::Semantic(format!("{v} out of range for INTEGER key")))?;
            Value::Integer(narrowed)
        }
        (Value::Integer(v), SqlType::Double) => Value::Double(*v as f64),
        (Value::BigInt(v), SqlType::Double) => Value::Double(*v as f64),
        (Value::Integer(v), SqlType::Timestamp) => Value::Timestamp(*v as i64),
        (Value::BigInt(v), SqlType::Timestamp) => Value::Timestamp(*v),
        _ => {
            return Err(DbError::Semantic(format!(
                "value {value} cannot be used as a {ty} key"
            )))
        }
    };
    Ok(ok)
}
