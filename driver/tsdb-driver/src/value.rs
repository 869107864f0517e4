///
/// Cell values.
///
/// One variant per `DataType`. Datetimes are epoch milliseconds in UTC,
/// matching the 64-bit integer the C layout carries for them.
///
/// `coerce` converts only when nothing is lost. A column whose values do not
/// all fit its type is moved up with `widen` until they do, so once the
/// column's type is resolved every cell is either `Null` or of that type.
///

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use crate::field::DataType;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Binary(Vec<u8>),
    String(String),
    Datetime(i64),
}

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Parses the textual datetime forms the store and CSV files use.
pub fn parse_datetime_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// How DATETIME cells are handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatetimeMode {
    /// `Value::Datetime` epoch milliseconds.
    #[default]
    Millis,
    /// `Value::String` text at this offset from UTC.
    Text(FixedOffset),
}

/// `YYYY-mm-dd HH:MM:SS.fff` at `offset`.
pub fn render_datetime(ms: i64, offset: FixedOffset) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

fn whole(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Next type up for a column of type `current` holding a value of type
/// `found` that does not fit it. Always returns a different type until
/// `Binary`, which holds everything.
pub fn widen(current: DataType, found: DataType) -> DataType {
    let numeric = matches!(
        found,
        DataType::Bool | DataType::Int | DataType::Int64 | DataType::Float | DataType::Double
    );
    match current {
        DataType::Null | DataType::Unknown => found,
        DataType::Bool | DataType::Int if matches!(found, DataType::Bool | DataType::Int | DataType::Int64) => {
            DataType::Int64
        }
        DataType::Bool | DataType::Int | DataType::Int64 | DataType::Float if numeric => DataType::Double,
        DataType::String | DataType::Binary => DataType::Binary,
        _ => DataType::String,
    }
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Int64(_) => DataType::Int64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Binary(_) => DataType::Binary,
            Value::String(_) => DataType::String,
            Value::Datetime(_) => DataType::Datetime,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i as i64),
            Value::Int64(i) | Value::Datetime(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Double(f) => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Int64(i) | Value::Datetime(i) => Some(*i as f64),
            Value::Float(f) => Some(*f as f64),
            Value::Double(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" | "t" | "T" | "True" | "1" => Some(true),
                "false" | "f" | "F" | "False" | "0" => Some(false),
                _ => None,
            },
            other => other.as_i64().map(|i| i != 0),
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Datetime(ms) => DateTime::from_timestamp_millis(*ms),
            _ => None,
        }
    }

    /// Converts to `target`, or `None` when the value cannot be represented
    /// exactly. `Null` converts to every type.
    pub fn coerce(self, target: DataType) -> Option<Value> {
        if self.data_type() == target || self.is_null() || target == DataType::Unknown {
            return Some(self);
        }
        match target {
            DataType::Bool => match &self {
                Value::String(_) => self.as_bool().map(Value::Bool),
                other => match other.exact_i64()? {
                    0 => Some(Value::Bool(false)),
                    1 => Some(Value::Bool(true)),
                    _ => None,
                },
            },
            DataType::Int => self.exact_i64().and_then(|i| i32::try_from(i).ok()).map(Value::Int),
            DataType::Int64 => self.exact_i64().map(Value::Int64),
            DataType::Float => {
                let f = self.exact_f64()?;
                let narrow = f as f32;
                (narrow as f64 == f).then_some(Value::Float(narrow))
            }
            DataType::Double => self.exact_f64().map(Value::Double),
            DataType::Datetime => match &self {
                Value::String(s) => parse_datetime_millis(s).map(Value::Datetime),
                Value::Int(_) | Value::Int64(_) => self.as_i64().map(Value::Datetime),
                _ => None,
            },
            DataType::String => match self {
                Value::Binary(bytes) => String::from_utf8(bytes).ok().map(Value::String),
                other => Some(Value::String(other.to_string())),
            },
            DataType::Binary => Some(Value::Binary(match self {
                Value::String(s) => s.into_bytes(),
                other => other.to_string().into_bytes(),
            })),
            DataType::Null | DataType::Unknown => None,
        }
    }

    /// Whether `coerce(target)` would succeed.
    pub fn fits(&self, target: DataType) -> bool {
        self.clone().coerce(target).is_some()
    }

    fn exact_i64(&self) -> Option<i64> {
        match self {
            Value::Float(f) => whole(*f as f64),
            Value::Double(f) => whole(*f),
            other => other.as_i64(),
        }
    }

    fn exact_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => {
                let f = *i as f64;
                (f < i64::MAX as f64 && f as i64 == *i).then_some(f)
            }
            Value::Datetime(_) | Value::Binary(_) | Value::Null => None,
            other => other.as_f64(),
        }
    }

    /// Infers a value from untyped text such as a CSV cell.
    /// Empty text is `Null`.
    pub fn infer(text: &str) -> Value {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int64(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Value::Double(f);
            }
        }
        match trimmed {
            "true" | "TRUE" | "True" => Value::Bool(true),
            "false" | "FALSE" | "False" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        }
    }

    /// Length in bytes for variable-length values.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            Value::Binary(b) => b.len(),
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Binary(b) => write!(f, "<binary {} bytes>", b.len()),
            Value::String(s) => f.write_str(s),
            Value::Datetime(ms) => match DateTime::from_timestamp_millis(*ms) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
                None => write!(f, "{}", ms),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
