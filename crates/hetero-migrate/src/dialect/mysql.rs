//! MySQL type dialect, including the native-type grammar used to
//! validate LLM-proposed target types.

use once_cell::sync::Lazy;
use regex::Regex;

use super::canonical::{split_params, CanonicalInfo, CanonicalType, TypeDialect, TypeMapping};

/// MySQL implementation of the canonical type functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

/// Longest VARCHAR MySQL accepts before the column must become TEXT.
const VARCHAR_MAX: u32 = 16_383;

/// Grammar of native types this pipeline will emit or accept for MySQL.
/// Proposed target types that do not match are rejected during mapping
/// validation rather than at DDL time.
static TYPE_GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xi)^(?:
            TINYINT(?:\(1\))? | SMALLINT | MEDIUMINT | INT | INTEGER | BIGINT
          | FLOAT | DOUBLE | DECIMAL\(\d{1,2},\s*\d{1,2}\)
          | BOOLEAN
          | VARCHAR\(\d{1,5}\) | CHAR\(\d{1,3}\)
          | TINYTEXT | TEXT | MEDIUMTEXT | LONGTEXT
          | BINARY\(\d{1,4}\) | VARBINARY\(\d{1,5}\)
          | TINYBLOB | BLOB | MEDIUMBLOB | LONGBLOB
          | DATE | TIME(?:\(\d\))? | DATETIME(?:\(\d\))? | TIMESTAMP(?:\(\d\))?
          | YEAR | JSON
          | ENUM\(\s*'[^']*'(?:\s*,\s*'[^']*')*\s*\)
        )$",
    )
    .expect("static type grammar must compile")
});

/// Check a native type string against the MySQL grammar.
pub fn is_valid_native_type(s: &str) -> bool {
    TYPE_GRAMMAR.is_match(s.trim())
}

impl TypeDialect for MysqlDialect {
    fn engine(&self) -> &'static str {
        "mysql"
    }

    fn to_canonical(&self, raw: &str) -> CanonicalInfo {
        let (base, args) = split_params(raw);
        let base = base.to_ascii_lowercase();
        let length = args.first().and_then(|a| a.parse::<u32>().ok());

        match base.as_str() {
            "tinyint" if length == Some(1) => CanonicalInfo::lossless(CanonicalType::Bool),
            "tinyint" => CanonicalInfo::lossless(CanonicalType::Int1),
            "smallint" => CanonicalInfo::lossless(CanonicalType::Int2),
            "int" | "integer" | "mediumint" => CanonicalInfo::lossless(CanonicalType::Int4),
            "bigint" => CanonicalInfo::lossless(CanonicalType::Int8),
            "float" => CanonicalInfo::lossless(CanonicalType::Float4),
            "double" => CanonicalInfo::lossless(CanonicalType::Float8),
            "decimal" | "numeric" => {
                let precision = args
                    .first()
                    .and_then(|a| a.parse::<u32>().ok())
                    .map(|p| p.min(65) as u8)
                    .unwrap_or(10);
                let scale = args
                    .get(1)
                    .and_then(|a| a.parse::<u32>().ok())
                    .map(|s| s.min(30) as u8)
                    .unwrap_or(0);
                CanonicalInfo::lossless(CanonicalType::Decimal { precision, scale })
            }
            "boolean" | "bool" => CanonicalInfo::lossless(CanonicalType::Bool),
            "varchar" => CanonicalInfo::lossless(CanonicalType::Text(length)),
            "char" => CanonicalInfo::lossy(CanonicalType::Text(length), "char_padding"),
            "tinytext" | "text" | "mediumtext" | "longtext" => {
                CanonicalInfo::lossless(CanonicalType::Clob)
            }
            "binary" => {
                CanonicalInfo::lossless(CanonicalType::BinaryFixed(length.unwrap_or(1)))
            }
            "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                CanonicalInfo::lossless(CanonicalType::Blob)
            }
            "date" => CanonicalInfo::lossless(CanonicalType::Date),
            "time" => CanonicalInfo::lossless(CanonicalType::Time),
            "datetime" => CanonicalInfo::lossless(CanonicalType::DateTime),
            "timestamp" => CanonicalInfo::lossy(
                CanonicalType::DateTime,
                "timestamp rendering depends on session timezone",
            ),
            "json" => CanonicalInfo::lossless(CanonicalType::Json),
            "enum" => {
                let vals = args
                    .iter()
                    .map(|a| a.trim_matches('\'').to_string())
                    .collect();
                CanonicalInfo::lossless(CanonicalType::Enum(vals))
            }
            _ => CanonicalInfo::lossy(
                CanonicalType::Unknown(raw.to_string()),
                format!("unmapped mysql type: {}", raw),
            ),
        }
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Int1 => TypeMapping::lossless("TINYINT"),
            CanonicalType::Int2 => TypeMapping::lossless("SMALLINT"),
            CanonicalType::Int4 => TypeMapping::lossless("INT"),
            CanonicalType::Int8 => TypeMapping::lossless("BIGINT"),
            CanonicalType::Float4 => TypeMapping::lossless("FLOAT"),
            CanonicalType::Float8 => TypeMapping::lossless("DOUBLE"),
            CanonicalType::Decimal { precision, scale } => TypeMapping::lossless(format!(
                "DECIMAL({},{})",
                (*precision).min(65),
                scale
            )),
            CanonicalType::Bool => TypeMapping::lossless("TINYINT(1)"),
            CanonicalType::Text(Some(n)) | CanonicalType::NText(Some(n)) => {
                if *n <= VARCHAR_MAX {
                    TypeMapping::lossless(format!("VARCHAR({})", n))
                } else {
                    TypeMapping::lossless("TEXT")
                }
            }
            CanonicalType::Text(None) | CanonicalType::NText(None) => {
                TypeMapping::lossless("TEXT")
            }
            CanonicalType::Clob => TypeMapping::lossless("LONGTEXT"),
            CanonicalType::Blob => TypeMapping::lossless("LONGBLOB"),
            CanonicalType::Date => TypeMapping::lossless("DATE"),
            CanonicalType::Time => TypeMapping::lossless("TIME"),
            CanonicalType::DateTime => TypeMapping::lossless("DATETIME"),
            CanonicalType::DateTimeTz => {
                TypeMapping::lossy("DATETIME", "loss=timezone")
            }
            CanonicalType::Json => TypeMapping::lossless("JSON"),
            CanonicalType::Uuid => TypeMapping::lossless("CHAR(36)"),
            CanonicalType::Enum(vals) => {
                let quoted: Vec<String> = vals
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect();
                TypeMapping::lossless(format!("ENUM({})", quoted.join(",")))
            }
            CanonicalType::BinaryFixed(n) => TypeMapping::lossless(format!("BINARY({})", n)),
            CanonicalType::Unknown(raw) => TypeMapping::lossy(
                "LONGTEXT",
                format!("fallback for unmapped source type {}", raw),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_canonical_spec_mappings() {
        let d = MysqlDialect;
        assert_eq!(d.from_canonical(&CanonicalType::Bool).target_type, "TINYINT(1)");
        assert_eq!(d.from_canonical(&CanonicalType::Uuid).target_type, "CHAR(36)");
        assert_eq!(d.from_canonical(&CanonicalType::Json).target_type, "JSON");
        assert_eq!(d.from_canonical(&CanonicalType::Blob).target_type, "LONGBLOB");

        let tz = d.from_canonical(&CanonicalType::DateTimeTz);
        assert_eq!(tz.target_type, "DATETIME");
        assert!(tz.is_lossy);
        assert_eq!(tz.warning.as_deref(), Some("loss=timezone"));
    }

    #[test]
    fn test_unknown_falls_back_flagged() {
        let d = MysqlDialect;
        let m = d.from_canonical(&CanonicalType::Unknown("geometry".into()));
        assert_eq!(m.target_type, "LONGTEXT");
        assert!(m.is_lossy);
    }

    #[test]
    fn test_long_varchar_becomes_text() {
        let d = MysqlDialect;
        assert_eq!(
            d.from_canonical(&CanonicalType::Text(Some(100_000))).target_type,
            "TEXT"
        );
    }

    #[test]
    fn test_type_grammar_accepts_emitted_types() {
        let d = MysqlDialect;
        let samples = [
            CanonicalType::Int1,
            CanonicalType::Int8,
            CanonicalType::Decimal {
                precision: 18,
                scale: 4,
            },
            CanonicalType::Bool,
            CanonicalType::Text(Some(255)),
            CanonicalType::Clob,
            CanonicalType::Blob,
            CanonicalType::Date,
            CanonicalType::DateTime,
            CanonicalType::DateTimeTz,
            CanonicalType::Json,
            CanonicalType::Uuid,
            CanonicalType::Enum(vec!["a".into(), "b".into()]),
            CanonicalType::BinaryFixed(16),
            CanonicalType::Unknown("whatever".into()),
        ];
        for canonical in samples {
            let native = d.from_canonical(&canonical).target_type;
            assert!(
                is_valid_native_type(&native),
                "grammar rejects emitted type {}",
                native
            );
        }
    }

    #[test]
    fn test_type_grammar_rejects_garbage() {
        assert!(!is_valid_native_type("BIGINTT"));
        assert!(!is_valid_native_type("VARCHAR"));
        assert!(!is_valid_native_type("DROP TABLE users"));
        assert!(!is_valid_native_type("NVARCHAR(MAX)"));
    }

    #[test]
    fn test_tinyint_1_reads_back_as_bool() {
        let d = MysqlDialect;
        assert_eq!(d.to_canonical("tinyint(1)").canonical, CanonicalType::Bool);
        assert_eq!(d.to_canonical("tinyint").canonical, CanonicalType::Int1);
    }

    #[test]
    fn test_enum_round_trip() {
        let d = MysqlDialect;
        let canonical = CanonicalType::Enum(vec!["red".into(), "green".into()]);
        let native = d.from_canonical(&canonical);
        assert_eq!(native.target_type, "ENUM('red','green')");
        assert_eq!(d.to_canonical(&native.target_type).canonical, canonical);
    }
}
