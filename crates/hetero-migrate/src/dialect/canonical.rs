//! Hub-and-spoke canonical type system.
//!
//! Instead of n*(n-1) direct type mappers, every engine implements two
//! total functions against a single intermediate representation:
//!
//! ```text
//! source native  →  CanonicalType  →  target native
//!   postgres     →     INT4        →    mysql INT
//!   mssql        →     INT4        →    mysql INT
//! ```
//!
//! The canonical set is a closed enumeration; anything a dialect cannot
//! classify becomes [`CanonicalType::Unknown`] and is flagged downstream.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonical (engine-independent) column type, with parameters where the
/// type carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalType {
    /// 8-bit integer.
    Int1,
    /// 16-bit integer.
    Int2,
    /// 32-bit integer.
    Int4,
    /// 64-bit integer.
    Int8,
    /// 32-bit floating point.
    Float4,
    /// 64-bit floating point.
    Float8,
    /// Exact decimal with precision (total digits) and scale.
    Decimal { precision: u8, scale: u8 },
    /// Boolean.
    Bool,
    /// Variable-length character data; `None` means unbounded.
    Text(Option<u32>),
    /// Variable-length national (Unicode) character data.
    NText(Option<u32>),
    /// Unlimited character data.
    Clob,
    /// Unlimited binary data.
    Blob,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp without timezone.
    DateTime,
    /// Timestamp with timezone.
    DateTimeTz,
    /// JSON document.
    Json,
    /// UUID/GUID.
    Uuid,
    /// Enumeration with its value list.
    Enum(Vec<String>),
    /// Fixed-length binary data.
    BinaryFixed(u32),
    /// Source type that could not be classified. Carries the raw type
    /// string for diagnostics; serializes as plain `UNKNOWN`.
    Unknown(String),
}

impl CanonicalType {
    /// Parameter-free discriminant, used as the row-transform dispatch key.
    pub fn kind(&self) -> CanonicalKind {
        match self {
            CanonicalType::Int1 => CanonicalKind::Int1,
            CanonicalType::Int2 => CanonicalKind::Int2,
            CanonicalType::Int4 => CanonicalKind::Int4,
            CanonicalType::Int8 => CanonicalKind::Int8,
            CanonicalType::Float4 => CanonicalKind::Float4,
            CanonicalType::Float8 => CanonicalKind::Float8,
            CanonicalType::Decimal { .. } => CanonicalKind::Decimal,
            CanonicalType::Bool => CanonicalKind::Bool,
            CanonicalType::Text(_) => CanonicalKind::Text,
            CanonicalType::NText(_) => CanonicalKind::NText,
            CanonicalType::Clob => CanonicalKind::Clob,
            CanonicalType::Blob => CanonicalKind::Blob,
            CanonicalType::Date => CanonicalKind::Date,
            CanonicalType::Time => CanonicalKind::Time,
            CanonicalType::DateTime => CanonicalKind::DateTime,
            CanonicalType::DateTimeTz => CanonicalKind::DateTimeTz,
            CanonicalType::Json => CanonicalKind::Json,
            CanonicalType::Uuid => CanonicalKind::Uuid,
            CanonicalType::Enum(_) => CanonicalKind::Enum,
            CanonicalType::BinaryFixed(_) => CanonicalKind::BinaryFixed,
            CanonicalType::Unknown(_) => CanonicalKind::Unknown,
        }
    }

    /// Whether the type is a member of the closed canonical set
    /// (everything except `UNKNOWN`).
    pub fn is_known(&self) -> bool {
        !matches!(self, CanonicalType::Unknown(_))
    }
}

/// Parameter-free canonical discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalKind {
    Int1,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Decimal,
    Bool,
    Text,
    NText,
    Clob,
    Blob,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Json,
    Uuid,
    Enum,
    BinaryFixed,
    Unknown,
}

impl std::fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalType::Int1 => write!(f, "INT1"),
            CanonicalType::Int2 => write!(f, "INT2"),
            CanonicalType::Int4 => write!(f, "INT4"),
            CanonicalType::Int8 => write!(f, "INT8"),
            CanonicalType::Float4 => write!(f, "FLOAT4"),
            CanonicalType::Float8 => write!(f, "FLOAT8"),
            CanonicalType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({},{})", precision, scale)
            }
            CanonicalType::Bool => write!(f, "BOOL"),
            CanonicalType::Text(Some(n)) => write!(f, "TEXT({})", n),
            CanonicalType::Text(None) => write!(f, "TEXT"),
            CanonicalType::NText(Some(n)) => write!(f, "NTEXT({})", n),
            CanonicalType::NText(None) => write!(f, "NTEXT"),
            CanonicalType::Clob => write!(f, "CLOB"),
            CanonicalType::Blob => write!(f, "BLOB"),
            CanonicalType::Date => write!(f, "DATE"),
            CanonicalType::Time => write!(f, "TIME"),
            CanonicalType::DateTime => write!(f, "DATETIME"),
            CanonicalType::DateTimeTz => write!(f, "DATETIMETZ"),
            CanonicalType::Json => write!(f, "JSON"),
            CanonicalType::Uuid => write!(f, "UUID"),
            CanonicalType::Enum(vals) => {
                let quoted: Vec<String> =
                    vals.iter().map(|v| format!("'{}'", v.replace('\'', "''"))).collect();
                write!(f, "ENUM({})", quoted.join(","))
            }
            CanonicalType::BinaryFixed(n) => write!(f, "BINARY_FIXED({})", n),
            CanonicalType::Unknown(_) => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for CanonicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, args) = split_params(s.trim());
        let base = base.to_ascii_uppercase();
        let first_u32 = || -> Option<u32> { args.first().and_then(|a| a.trim().parse().ok()) };
        match base.as_str() {
            "INT1" => Ok(CanonicalType::Int1),
            "INT2" => Ok(CanonicalType::Int2),
            "INT4" => Ok(CanonicalType::Int4),
            "INT8" => Ok(CanonicalType::Int8),
            "FLOAT4" => Ok(CanonicalType::Float4),
            "FLOAT8" => Ok(CanonicalType::Float8),
            "DECIMAL" => {
                let precision = args
                    .first()
                    .and_then(|a| a.trim().parse().ok())
                    .unwrap_or(38);
                let scale = args.get(1).and_then(|a| a.trim().parse().ok()).unwrap_or(0);
                Ok(CanonicalType::Decimal { precision, scale })
            }
            "BOOL" => Ok(CanonicalType::Bool),
            "TEXT" => Ok(CanonicalType::Text(first_u32())),
            "NTEXT" => Ok(CanonicalType::NText(first_u32())),
            "CLOB" => Ok(CanonicalType::Clob),
            "BLOB" => Ok(CanonicalType::Blob),
            "DATE" => Ok(CanonicalType::Date),
            "TIME" => Ok(CanonicalType::Time),
            "DATETIME" => Ok(CanonicalType::DateTime),
            "DATETIMETZ" => Ok(CanonicalType::DateTimeTz),
            "JSON" => Ok(CanonicalType::Json),
            "UUID" => Ok(CanonicalType::Uuid),
            "ENUM" => {
                let vals = args
                    .iter()
                    .map(|a| a.trim().trim_matches('\'').to_string())
                    .collect();
                Ok(CanonicalType::Enum(vals))
            }
            "BINARY_FIXED" => Ok(CanonicalType::BinaryFixed(first_u32().unwrap_or(1))),
            "UNKNOWN" => Ok(CanonicalType::Unknown(String::new())),
            other => Err(format!("not a canonical type: {}", other)),
        }
    }
}

impl Serialize for CanonicalType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CanonicalType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Split a type string like `decimal(18,4)` into its base name and
/// parenthesised arguments. Quoted ENUM values keep commas intact.
pub(crate) fn split_params(s: &str) -> (&str, Vec<String>) {
    let Some(open) = s.find('(') else {
        return (s, Vec::new());
    };
    let base = s[..open].trim_end();
    let inner = s[open + 1..].trim_end().trim_end_matches(')');
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for ch in inner.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            ',' if !in_quote => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    (base, args)
}

/// Result of converting a native type to canonical form.
///
/// The optional `loss` annotation records information that will not
/// round-trip (e.g. `TIMESTAMPTZ → DATETIME` drops the zone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalInfo {
    pub canonical: CanonicalType,
    pub loss: Option<String>,
}

impl CanonicalInfo {
    pub fn lossless(canonical: CanonicalType) -> Self {
        Self {
            canonical,
            loss: None,
        }
    }

    pub fn lossy(canonical: CanonicalType, loss: impl Into<String>) -> Self {
        Self {
            canonical,
            loss: Some(loss.into()),
        }
    }
}

/// Result of rendering a canonical type to a native target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Native type string, e.g. `VARCHAR(255)` or `BIGINT`.
    pub target_type: String,
    /// Whether the mapping loses information or is a flagged fallback.
    pub is_lossy: bool,
    /// Warning text for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// The two total type functions every engine implements.
pub trait TypeDialect: Send + Sync {
    /// Engine name (`postgres`, `mssql`, `mysql`).
    fn engine(&self) -> &'static str;

    /// Parse a native type string into canonical form, recording loss.
    fn to_canonical(&self, raw: &str) -> CanonicalInfo;

    /// Render a canonical type as the best native type for this engine.
    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let cases = [
            "INT4",
            "DECIMAL(18,4)",
            "TEXT(255)",
            "TEXT",
            "NTEXT(100)",
            "BOOL",
            "DATETIMETZ",
            "UUID",
            "BINARY_FIXED(16)",
            "UNKNOWN",
        ];
        for case in cases {
            let parsed: CanonicalType = case.parse().unwrap();
            assert_eq!(parsed.to_string(), case);
        }
    }

    #[test]
    fn test_parse_enum_values() {
        let parsed: CanonicalType = "ENUM('a','b,c')".parse().unwrap();
        assert_eq!(
            parsed,
            CanonicalType::Enum(vec!["a".to_string(), "b,c".to_string()])
        );
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        assert!("VARCHAR(255)".parse::<CanonicalType>().is_err());
        assert!("BIGINT".parse::<CanonicalType>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let t = CanonicalType::Decimal {
            precision: 18,
            scale: 4,
        };
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"DECIMAL(18,4)\"");
        let back: CanonicalType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_split_params() {
        let (base, args) = split_params("numeric(18, 4)");
        assert_eq!(base, "numeric");
        assert_eq!(args, vec!["18", "4"]);

        let (base, args) = split_params("timestamp with time zone");
        assert_eq!(base, "timestamp with time zone");
        assert!(args.is_empty());
    }

    #[test]
    fn test_kind_strips_params() {
        let a = CanonicalType::Text(Some(10));
        let b = CanonicalType::Text(None);
        assert_eq!(a.kind(), b.kind());
        assert!(CanonicalType::Unknown("geometry".into()).kind() == CanonicalKind::Unknown);
    }
}
