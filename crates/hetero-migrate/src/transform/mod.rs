//! Per-cell row transforms between canonical types.
//!
//! A transform is a deterministic pure function from a source value to a
//! target value, selected by the `(source canonical, target canonical)`
//! pair. The table is static: a missing entry is discovered during mapping
//! validation, never at row-load time. NULL always passes through
//! unchanged.

use chrono::Utc;

use crate::core::value::SqlValue;
use crate::dialect::{CanonicalKind, CanonicalType};
use crate::error::{LoadErrorKind, MigrateError, Result};

/// A pure per-cell transform.
pub type ValueTransform = fn(SqlValue) -> Result<SqlValue>;

fn conversion_error(expected: &str, got: &SqlValue) -> MigrateError {
    MigrateError::Load {
        table: String::new(),
        kind: LoadErrorKind::TypeConversion,
        message: format!("expected {} value, got {:?}", expected, got),
    }
}

fn identity(v: SqlValue) -> Result<SqlValue> {
    Ok(v)
}

/// `BOOL → TINYINT(1)`: true ↦ 1, false ↦ 0.
fn bool_to_int(v: SqlValue) -> Result<SqlValue> {
    match v {
        SqlValue::Bool(b) => Ok(SqlValue::I16(i16::from(b))),
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) => Ok(v),
        other => Err(conversion_error("boolean", &other)),
    }
}

/// `UUID → CHAR(36)`: lowercase, hyphenated.
fn uuid_to_text(v: SqlValue) -> Result<SqlValue> {
    match v {
        SqlValue::Uuid(u) => Ok(SqlValue::Text(u.hyphenated().to_string())),
        SqlValue::Text(s) => {
            let parsed: uuid::Uuid = s
                .parse()
                .map_err(|_| conversion_error("uuid", &SqlValue::Text(s.clone())))?;
            Ok(SqlValue::Text(parsed.hyphenated().to_string()))
        }
        other => Err(conversion_error("uuid", &other)),
    }
}

/// `JSON/JSONB → JSON`: re-serialized in canonical (sorted-key) form.
fn json_canonicalize(v: SqlValue) -> Result<SqlValue> {
    match v {
        SqlValue::Json(doc) => Ok(SqlValue::Text(doc.to_string())),
        SqlValue::Text(s) => {
            let doc: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| conversion_error(&format!("json ({})", e), &SqlValue::Null))?;
            Ok(SqlValue::Text(doc.to_string()))
        }
        other => Err(conversion_error("json", &other)),
    }
}

/// `DATETIMETZ → DATETIME`: convert to UTC, drop the zone.
fn tz_to_naive_utc(v: SqlValue) -> Result<SqlValue> {
    match v {
        SqlValue::DateTimeTz(dt) => Ok(SqlValue::DateTime(dt.with_timezone(&Utc).naive_utc())),
        SqlValue::DateTime(_) => Ok(v),
        other => Err(conversion_error("timestamp with timezone", &other)),
    }
}

/// Anything textual widens to text.
fn to_text(v: SqlValue) -> Result<SqlValue> {
    match v {
        SqlValue::Text(_) => Ok(v),
        SqlValue::Json(doc) => Ok(SqlValue::Text(doc.to_string())),
        other => Ok(SqlValue::Text(other.canonical_encoding())),
    }
}

/// Look up the transform for a canonical pair. `None` means the pair is
/// unsupported and the mapping must be rejected during validation.
pub fn transform_for(source: &CanonicalType, target: &CanonicalType) -> Option<ValueTransform> {
    use CanonicalKind::*;

    let pair = (source.kind(), target.kind());
    match pair {
        // Integer widening and identity.
        (Int1 | Int2 | Int4 | Int8, Int1 | Int2 | Int4 | Int8) => Some(identity),
        (Float4 | Float8, Float4 | Float8) => Some(identity),
        (Decimal, Decimal) => Some(identity),
        (Decimal, Float8) | (Int1 | Int2 | Int4 | Int8, Decimal) => Some(identity),

        // Booleans land in TINYINT(1) on MySQL; the kind stays BOOL when
        // the target supports it natively.
        (Bool, Bool) => Some(bool_to_int),
        (Bool, Int1 | Int2 | Int4 | Int8) => Some(bool_to_int),

        // Text family: all pairs are plain carries.
        (Text | NText | Clob, Text | NText | Clob) => Some(identity),
        (Enum, Enum) | (Enum, Text | NText | Clob) => Some(identity),

        // Binary identity.
        (Blob, Blob) => Some(identity),
        (BinaryFixed, BinaryFixed | Blob) => Some(identity),

        // Temporal.
        (Date, Date) | (Time, Time) | (DateTime, DateTime) => Some(identity),
        (DateTimeTz, DateTimeTz) => Some(identity),
        (DateTimeTz, DateTime) => Some(tz_to_naive_utc),

        // Special types.
        (Uuid, Uuid) => Some(uuid_to_text),
        (Uuid, Text | NText) => Some(uuid_to_text),
        (Json, Json) => Some(json_canonicalize),
        (Json, Text | NText | Clob) => Some(json_canonicalize),

        // The UNKNOWN fallback lane: values are carried as text.
        (Unknown, Text | NText | Clob | Unknown) => Some(to_text),

        _ => None,
    }
}

/// Transform one row in place using per-column transforms.
///
/// The transforms slice is aligned with the row's columns; NULLs skip the
/// transform entirely.
pub fn apply_row(transforms: &[ValueTransform], row: Vec<SqlValue>) -> Result<Vec<SqlValue>> {
    if transforms.len() != row.len() {
        return Err(MigrateError::Load {
            table: String::new(),
            kind: LoadErrorKind::Unknown,
            message: format!(
                "row has {} cells but mapping has {} columns",
                row.len(),
                transforms.len()
            ),
        });
    }
    row.into_iter()
        .zip(transforms.iter())
        .map(|(value, transform)| {
            if value.is_null() {
                Ok(SqlValue::Null)
            } else {
                transform(value)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn test_bool_to_tinyint() {
        let t = transform_for(&CanonicalType::Bool, &CanonicalType::Bool).unwrap();
        assert_eq!(t(SqlValue::Bool(true)).unwrap(), SqlValue::I16(1));
        assert_eq!(t(SqlValue::Bool(false)).unwrap(), SqlValue::I16(0));
    }

    #[test]
    fn test_uuid_lowercase_hyphenated() {
        let t = transform_for(&CanonicalType::Uuid, &CanonicalType::Uuid).unwrap();
        let out = t(SqlValue::Text(
            "550E8400-E29B-41D4-A716-446655440000".into(),
        ))
        .unwrap();
        assert_eq!(
            out,
            SqlValue::Text("550e8400-e29b-41d4-a716-446655440000".into())
        );
    }

    #[test]
    fn test_json_canonicalized() {
        let t = transform_for(&CanonicalType::Json, &CanonicalType::Json).unwrap();
        let out = t(SqlValue::Text(r#"{"z": 1, "a": {"c": 2, "b": 3}}"#.into())).unwrap();
        assert_eq!(out, SqlValue::Text(r#"{"a":{"b":3,"c":2},"z":1}"#.into()));
    }

    #[test]
    fn test_datetimetz_to_utc_naive() {
        // 2024-01-01 10:00:00+05:00 must become 2024-01-01 05:00:00.
        let t =
            transform_for(&CanonicalType::DateTimeTz, &CanonicalType::DateTime).unwrap();
        let tz = FixedOffset::east_opt(5 * 3600).unwrap();
        let src = tz.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let out = t(SqlValue::DateTimeTz(src)).unwrap();
        match out {
            SqlValue::DateTime(naive) => {
                assert_eq!(naive.to_string(), "2024-01-01 05:00:00");
            }
            other => panic!("expected DateTime, got {:?}", other),
        }
    }

    #[test]
    fn test_null_preserved_through_any_transform() {
        let transforms: Vec<ValueTransform> = vec![
            transform_for(&CanonicalType::Bool, &CanonicalType::Bool).unwrap(),
            transform_for(&CanonicalType::Json, &CanonicalType::Json).unwrap(),
        ];
        let out = apply_row(&transforms, vec![SqlValue::Null, SqlValue::Null]).unwrap();
        assert_eq!(out, vec![SqlValue::Null, SqlValue::Null]);
    }

    #[test]
    fn test_missing_pair_is_none() {
        assert!(transform_for(&CanonicalType::Blob, &CanonicalType::Int4).is_none());
        assert!(transform_for(&CanonicalType::DateTime, &CanonicalType::Bool).is_none());
    }

    #[test]
    fn test_bad_value_is_type_conversion_error() {
        let t = transform_for(&CanonicalType::Uuid, &CanonicalType::Uuid).unwrap();
        let err = t(SqlValue::Text("not-a-uuid".into())).unwrap_err();
        match err {
            MigrateError::Load { kind, .. } => {
                assert_eq!(kind, LoadErrorKind::TypeConversion);
            }
            other => panic!("expected Load error, got {:?}", other),
        }
    }

    #[test]
    fn test_row_length_mismatch_rejected() {
        let transforms: Vec<ValueTransform> = vec![identity];
        assert!(apply_row(&transforms, vec![SqlValue::Null, SqlValue::Null]).is_err());
    }
}
