//! SQL value types for engine-neutral data transfer.
//!
//! Every cell read from a source or written to a target passes through
//! [`SqlValue`]. The enum also defines the *canonical encoding* used by
//! sample hashing: a deterministic string form that both source and target
//! connectors compute identically for equivalent data.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single row as read from or written to a database, ordered by the
/// column list of the surrounding query.
pub type Row = Vec<SqlValue>;

/// Engine-neutral SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL. Preserved unchanged through every row transform.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint, tinyint widened).
    I16(i16),

    /// 32-bit signed integer.
    I32(i32),

    /// 64-bit signed integer.
    I64(i64),

    /// 32-bit floating point.
    F32(f32),

    /// 64-bit floating point.
    F64(f64),

    /// Exact decimal.
    Decimal(Decimal),

    /// Text data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// JSON document.
    Json(serde_json::Value),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeTz(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Deterministic string form used for cross-engine row hashing.
    ///
    /// The encoding normalises representation differences between engines:
    /// booleans as `1`/`0`, decimals with trailing zeros stripped, UUIDs
    /// lowercase hyphenated, bytes as lowercase hex, JSON with sorted keys,
    /// and all timestamps at second granularity in UTC.
    #[must_use]
    pub fn canonical_encoding(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => format!("{}", *v as f64),
            SqlValue::F64(v) => format!("{}", v),
            SqlValue::Decimal(v) => v.normalize().to_string(),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Bytes(v) => hex::encode(v),
            SqlValue::Uuid(v) => v.hyphenated().to_string(),
            SqlValue::Json(v) => v.to_string(),
            // Dates encode like midnight timestamps: engines that return
            // DATE columns as zero-time datetimes then hash identically.
            SqlValue::Date(v) => v.format("%Y-%m-%dT00:00:00").to_string(),
            SqlValue::Time(v) => v.format("%H:%M:%S").to_string(),
            SqlValue::DateTime(v) => v.format("%Y-%m-%dT%H:%M:%S").to_string(),
            SqlValue::DateTimeTz(v) => v
                .with_timezone(&Utc)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string(),
        }
    }

    /// Render as a flat string for DLQ records. NULL becomes `\N`.
    #[must_use]
    pub fn display_for_dlq(&self) -> String {
        match self {
            SqlValue::Null => "\\N".to_string(),
            other => other.canonical_encoding(),
        }
    }
}

// Convenience constructors mirroring how driver code produces values.
impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::F32(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        SqlValue::DateTimeTz(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}
