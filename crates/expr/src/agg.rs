use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use types::Value;

/// The supported aggregate functions. `CountStar` is `COUNT(*)`, which
/// counts rows regardless of NULL-ness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggFunc::CountStar | AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        };
        f.write_str(s)
    }
}

/// Incremental state for one aggregate over one group.
///
/// NULL handling follows SQL: COUNT(expr)/SUM/AVG/MIN/MAX skip NULL
/// inputs; with no non-NULL input COUNT yields 0 and the others NULL.
#[derive(Clone, Debug)]
pub struct AggAccumulator {
    func: AggFunc,
    count: i64,
    sum_int: i64,
    sum_float: f64,
    saw_float: bool,
    extreme: Option<Value>,
}

impl AggAccumulator {
    pub fn new(func: AggFunc) -> Self {
        Self {
            func,
            count: 0,
            sum_int: 0,
            sum_float: 0.0,
            saw_float: false,
            extreme: None,
        }
    }

    pub fn update(&mut self, value: &Value) -> DbResult<()> {
        match self.func {
            AggFunc::CountStar => {
                self.count += 1;
            }
            AggFunc::Count => {
                if !value.is_null() {
                    self.count += 1;
                }
            }
            AggFunc::Sum | AggFunc::Avg => {
                if value.is_null() {
                    return Ok(());
                }
                self.count += 1;
                match value {
                    Value::Integer(v) => {
                        self.sum_int = self.sum_int.checked_add(*v as i64).ok_or_else(|| {
                            DbError::Semantic("SUM overflowed BIGINT".into())
                        })?;
                        self.sum_float += *v as f64;
                    }
                    Value::BigInt(v) => {
                        self.sum_int = self.sum_int.checked_add(*v).ok_or_else(|| {
                            DbError::Semantic("SUM overflowed BIGINT".into())
                        })?;
                        self.sum_float += *v as f64;
                    }
                    Value::Double(v) => {
                        self.saw_float = true;
                        self.sum_float += v;
                    }
                    other => {
                        return Err(DbError::Semantic(format!(
                            "{}({other}) is not numeric",
                            self.func
                        )))
                    }
                }
            }
            AggFunc::Min | AggFunc::Max => {
                if value.is_null() {
                    return Ok(());
                }
                let replace = match &self.extreme {
                    None => true,
                    Some(current) => {
                        let ord = value.compare(current).ok_or_else(|| {
                            DbError::Semantic(format!(
                                "{} over mixed types {current} and {value}",
                                self.func
                            ))
                        })?;
                        match self.func {
                            AggFunc::Min => ord.is_lt(),
                            AggFunc::Max => ord.is_gt(),
                            _ => unreachable!(),
                        }
                    }
                };
                if replace {
                    self.extreme = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    pub fn finish(&self) -> Value {
        match self.func {
            AggFunc::CountStar | AggFunc::Count => Value::BigInt(self.count),
            AggFunc::Sum => {
                if self.count == 0 {
                    Value::Null
                } else if self.saw_float {
                    Value::Double(self.sum_float)
                } else {
                    Value::BigInt(self.sum_int)
                }
            }
            AggFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Double(self.sum_float / self.count as f64)
                }
            }
            AggFunc::Min | AggFunc::Max => self.extreme.clone().unwrap_or(Value::Null),
        }
    }
}
