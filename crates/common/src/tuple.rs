use crate::{DbError, DbResult, Rid, Schema};
use serde::{Deserialize, Serialize};
use types::{SqlType, Value};

/// Positional row of values conforming to a `Schema`.
///
/// The wire form is a fixed-width header (null bitmap, then one u16 payload
/// offset per column) followed by the variable-width payloads. A NULL
/// column has its bitmap bit set and offset 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub values: Vec<Value>,
    #[serde(skip)]
    #[serde(default)]
    rid: Option<Rid>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn with_rid(mut self, rid: Rid) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<Rid>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn value(&self, ordinal: usize) -> DbResult<&Value> {
        self.values
            .get(ordinal)
            .ok_or_else(|| DbError::Internal(format!("tuple has no column {ordinal}")))
    }

    /// Serializes against `schema`; value count and types must conform.
    pub fn serialize(&self, schema: &Schema) -> DbResult<Vec<u8>> {
        if self.values.len() != schema.len() {
            return Err(DbError::Internal(format!(
                "tuple has {} values for a {}-column schema",
                self.values.len(),
                schema.len()
            )));
        }
        let ncols = schema.len();
        let bitmap_len = ncols.div_ceil(8);
        let header_len = bitmap_len + ncols * 2;

        let mut bitmap = vec![0u8; bitmap_len];
        let mut offsets = vec![0u16; ncols];
        let mut payload = Vec::new();

        for (idx, value) in self.values.iter().enumerate() {
            if value.is_null() {
                bitmap[idx / 8] |= 1 << (idx % 8);
                continue;
            }
            let column = schema.column(idx)?;
            if value.sql_type() != Some(column.ty) {
                return Err(DbError::Internal(format!(
                    "value {value:?} does not match column '{}' of type {}",
                    column.name, column.ty
                )));
            }
            let offset = header_len + payload.len();
            if offset > u16::MAX as usize {
                return Err(DbError::OutOfResources("tuple exceeds page capacity".into()));
            }
            offsets[idx] = offset as u16;
            encode_value(value, &mut payload);
        }

        let mut out = Vec::with_capacity(header_len + payload.len());
        out.extend_from_slice(&bitmap);
        for offset in offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Exact inverse of `serialize`.
    pub fn deserialize(bytes: &[u8], schema: &Schema) -> DbResult<Tuple> {
        let ncols = schema.len();
        let bitmap_len = ncols.div_ceil(8);
        let header_len = bitmap_len + ncols * 2;
        if bytes.len() < header_len {
            return Err(DbError::Corruption("tuple shorter than its header".into()));
        }

        let mut values = Vec::with_capacity(ncols);
        for idx in 0..ncols {
            let is_null = bytes[idx / 8] & (1 << (idx % 8)) != 0;
            if is_null {
                values.push(Value::Null);
                continue;
            }
            let off_pos = bitmap_len + idx * 2;
            let offset = u16::from_le_bytes([bytes[off_pos], bytes[off_pos + 1]]) as usize;
            let column = schema.column(idx)?;
            values.push(decode_value(bytes, offset, column.ty)?);
        }
        Ok(Tuple::new(values))
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Tuple::new(values)
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => unreachable!("NULL is encoded in the bitmap"),
        Value::Boolean(b) => out.push(*b as u8),
        Value::Integer(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::BigInt(v) | Value::Timestamp(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Varchar(s) => {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn decode_value(bytes: &[u8], offset: usize, ty: SqlType) -> DbResult<Value> {
    let need = |n: usize| -> DbResult<&[u8]> {
        bytes
            .get(offset..offset + n)
            .ok_or_else(|| DbError::Corruption("tuple payload out of bounds".into()))
    };
    Ok(match ty {
        SqlType::Boolean => Value::Boolean(need(1)?[0] != 0),
        SqlType::Integer => Value::Integer(i32::from_le_bytes(need(4)?.try_into().unwrap())),
        SqlType::BigInt => Value::BigInt(i64::from_le_bytes(need(8)?.try_into().unwrap())),
        SqlType::Timestamp => Value::Timestamp(i64::from_le_bytes(need(8)?.try_into().unwrap())),
        SqlType::Double => Value::Double(f64::from_le_bytes(need(8)?.try_into().unwrap())),
        SqlType::Varchar => {
            let len = u32::from_le_bytes(need(4)?.try_into().unwrap()) as usize;
            let data = bytes
                .get(offset + 4..offset + 4 + len)
                .ok_or_else(|| DbError::Corruption("varchar payload out of bounds".into()))?;
            let text = std::str::from_utf8(data)
                .map_err(|_| DbError::Corruption("varchar payload is not UTF-8".into()))?;
            Value::Varchar(text.to_string())
        }
    })
}
