//! Driver-neutral values and conversions between them and Rust field types.
//!
//! ```rust
//! use dbmap_core::{FieldValue, Value};
//!
//! let val = 42i32.to_value();
//! assert_eq!(val, Value::Int(42));
//!
//! // Integers narrow with a range check.
//! assert_eq!(i16::from_value(Value::Int(7)).unwrap(), 7);
//! assert!(i16::from_value(Value::Int(70_000)).is_err());
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// A value bound as a statement parameter or read from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value (narrowed to the column width at bind time).
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary value.
    Bytes(Vec<u8>),
    /// JSON document.
    Json(serde_json::Value),
    /// UUID value.
    Uuid(Uuid),
    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),
    /// Timestamp without time zone.
    NaiveTimestamp(NaiveDateTime),
    /// Calendar date.
    Date(NaiveDate),
}

impl Value {
    /// Check if this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamptz",
            Self::NaiveTimestamp(_) => "timestamp",
            Self::Date(_) => "date",
        }
    }

    /// The JSON representation of this value.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Text(s) => Json::String(s.clone()),
            Self::Bytes(b) => Json::from(b.clone()),
            Self::Json(j) => j.clone(),
            Self::Uuid(u) => Json::String(u.to_string()),
            Self::Timestamp(t) => Json::String(t.to_rfc3339()),
            Self::NaiveTimestamp(t) => Json::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

#[track_caller]
fn mismatch<T>(value: &Value) -> DbError {
    DbError::mapping(format!(
        "cannot convert {} value to {}",
        value.type_name(),
        std::any::type_name::<T>()
    ))
}

/// A Rust type that can be stored in a mapped column.
///
/// `from_value` is the "explicit conversion" step of assignment: the
/// identical variant is taken as-is, compatible variants are converted, and
/// anything else is a mapping error.
pub trait FieldValue: Sized + Send + Sync + 'static {
    /// Convert the field's current value.
    fn to_value(&self) -> Value;

    /// Convert a column value into the field type.
    fn from_value(value: Value) -> DbResult<Self>;
}

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

macro_rules! impl_int_field {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }

                fn from_value(value: Value) -> DbResult<Self> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i).map_err(|e| {
                            DbError::mapping(format!(
                                "integer {} out of range for {}",
                                i,
                                stringify!($ty)
                            ))
                            .with_source(e)
                        }),
                        Value::Bool(b) => Ok(<$ty>::from(b)),
                        Value::Text(ref s) => s.trim().parse::<$ty>().map_err(|e| {
                            DbError::mapping(format!("cannot parse {:?} as {}", s, stringify!($ty)))
                                .with_source(e)
                        }),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }
            }
        )*
    };
}

impl_int_field!(i16, i32, i64);

impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Float(f) => Ok(f as f32),
            Value::Int(i) => Ok(i as f32),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Uuid(u) => Ok(u.to_string()),
            Value::Json(j) => Ok(j.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(ref s) => Uuid::parse_str(s).map_err(|e| {
                DbError::mapping(format!("cannot parse {:?} as uuid", s)).with_source(e)
            }),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            Value::NaiveTimestamp(t) => Ok(t.and_utc()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::NaiveTimestamp(*self)
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::NaiveTimestamp(t) => Ok(t),
            Value::Timestamp(t) => Ok(t.naive_utc()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Date(d) => Ok(d),
            Value::Timestamp(t) => Ok(t.date_naive()),
            Value::NaiveTimestamp(t) => Ok(t.date()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FieldValue for serde_json::Value {
    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Json(j) => Ok(j),
            Value::Text(ref s) => serde_json::from_str(s)
                .map_err(|e| DbError::mapping("malformed JSON text").with_source(e)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<V: FieldValue> FieldValue for Option<V> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => V::from_value(other).map(Some),
        }
    }
}

macro_rules! impl_from_field {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    v.to_value()
                }
            }

            impl From<Option<$ty>> for Value {
                fn from(v: Option<$ty>) -> Self {
                    v.to_value()
                }
            }
        )*
    };
}

impl_from_field!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    Vec<u8>,
    Uuid,
    DateTime<Utc>,
    NaiveDateTime,
    NaiveDate,
    serde_json::Value
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_narrowing() {
        assert_eq!(i32::from_value(Value::Int(12)).unwrap(), 12);
        let err = i16::from_value(Value::Int(i64::from(i16::MAX) + 1)).unwrap_err();
        assert!(err.is_mapping());
    }

    #[test]
    fn test_text_conversions() {
        assert_eq!(i64::from_value(Value::Text(" 19 ".into())).unwrap(), 19);
        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_value(Value::Text(id.to_string())).unwrap(), id);
        assert!(Uuid::from_value(Value::Text("not-a-uuid".into())).is_err());
    }

    #[test]
    fn test_option_round_trip() {
        assert_eq!(Option::<i32>::None.to_value(), Value::Null);
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(Value::Int(3)).unwrap(), Some(3));
    }

    #[test]
    fn test_mismatch_is_mapping_error() {
        let err = bool::from_value(Value::Text("yes".into())).unwrap_err();
        assert!(err.is_mapping());
        assert!(err.message.contains("text"));
    }

    #[test]
    fn test_timestamp_widening() {
        let naive = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let utc = DateTime::<Utc>::from_value(Value::NaiveTimestamp(naive)).unwrap();
        assert_eq!(utc.naive_utc(), naive);
    }

    #[test]
    fn test_value_from_impls() {
        assert_eq!(Value::from(5i64), Value::Int(5));
        assert_eq!(Value::from("abc"), Value::Text("abc".into()));
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }
}
