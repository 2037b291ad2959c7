//! PostgreSQL type dialect.

use super::canonical::{split_params, CanonicalInfo, CanonicalType, TypeDialect, TypeMapping};

/// PostgreSQL implementation of the canonical type functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

fn decimal_params(args: &[String]) -> (u8, u8) {
    let precision = args
        .first()
        .and_then(|a| a.parse::<u32>().ok())
        .map(|p| p.min(65) as u8)
        .unwrap_or(38);
    let scale = args
        .get(1)
        .and_then(|a| a.parse::<u32>().ok())
        .map(|s| s.min(30) as u8)
        .unwrap_or(0);
    (precision, scale)
}

impl TypeDialect for PostgresDialect {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn to_canonical(&self, raw: &str) -> CanonicalInfo {
        let (base, args) = split_params(raw);
        let base = base.to_ascii_lowercase();
        let length = args.first().and_then(|a| a.parse::<u32>().ok());

        match base.as_str() {
            "smallint" | "int2" => CanonicalInfo::lossless(CanonicalType::Int2),
            "integer" | "int" | "int4" | "serial" => {
                CanonicalInfo::lossless(CanonicalType::Int4)
            }
            "bigint" | "int8" | "bigserial" => CanonicalInfo::lossless(CanonicalType::Int8),
            "real" | "float4" => CanonicalInfo::lossless(CanonicalType::Float4),
            "double precision" | "float8" => CanonicalInfo::lossless(CanonicalType::Float8),
            "numeric" | "decimal" => {
                let (precision, scale) = decimal_params(&args);
                if args.is_empty() {
                    CanonicalInfo::lossy(
                        CanonicalType::Decimal {
                            precision: 38,
                            scale: 10,
                        },
                        "unbounded numeric narrowed to DECIMAL(38,10)",
                    )
                } else {
                    CanonicalInfo::lossless(CanonicalType::Decimal { precision, scale })
                }
            }
            "money" => CanonicalInfo::lossy(
                CanonicalType::Decimal {
                    precision: 19,
                    scale: 4,
                },
                "money formatting lost",
            ),
            "character varying" | "varchar" => {
                CanonicalInfo::lossless(CanonicalType::Text(length))
            }
            "character" | "char" | "bpchar" => CanonicalInfo::lossy(
                CanonicalType::Text(length),
                "char_padding",
            ),
            "text" | "citext" => CanonicalInfo::lossless(CanonicalType::Clob),
            "boolean" | "bool" => CanonicalInfo::lossless(CanonicalType::Bool),
            "bytea" => CanonicalInfo::lossless(CanonicalType::Blob),
            "date" => CanonicalInfo::lossless(CanonicalType::Date),
            "time" | "time without time zone" => CanonicalInfo::lossless(CanonicalType::Time),
            "timestamp" | "timestamp without time zone" => {
                CanonicalInfo::lossless(CanonicalType::DateTime)
            }
            "timestamptz" | "timestamp with time zone" => {
                CanonicalInfo::lossless(CanonicalType::DateTimeTz)
            }
            "json" => CanonicalInfo::lossless(CanonicalType::Json),
            "jsonb" => CanonicalInfo::lossless(CanonicalType::Json),
            "uuid" => CanonicalInfo::lossless(CanonicalType::Uuid),
            "xml" => CanonicalInfo::lossy(CanonicalType::Clob, "xml stored as text"),
            "inet" | "cidr" | "macaddr" | "interval" => CanonicalInfo::lossy(
                CanonicalType::Text(None),
                format!("{} stored as text", base),
            ),
            _ => CanonicalInfo::lossy(
                CanonicalType::Unknown(raw.to_string()),
                format!("unmapped postgres type: {}", raw),
            ),
        }
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            // Postgres has no 1-byte integer; SMALLINT covers the range.
            CanonicalType::Int1 => TypeMapping::lossless("SMALLINT"),
            CanonicalType::Int2 => TypeMapping::lossless("SMALLINT"),
            CanonicalType::Int4 => TypeMapping::lossless("INTEGER"),
            CanonicalType::Int8 => TypeMapping::lossless("BIGINT"),
            CanonicalType::Float4 => TypeMapping::lossless("REAL"),
            CanonicalType::Float8 => TypeMapping::lossless("DOUBLE PRECISION"),
            CanonicalType::Decimal { precision, scale } => {
                TypeMapping::lossless(format!("NUMERIC({},{})", precision, scale))
            }
            CanonicalType::Bool => TypeMapping::lossless("BOOLEAN"),
            CanonicalType::Text(Some(n)) | CanonicalType::NText(Some(n)) => {
                TypeMapping::lossless(format!("VARCHAR({})", n))
            }
            CanonicalType::Text(None) | CanonicalType::NText(None) => {
                TypeMapping::lossless("TEXT")
            }
            CanonicalType::Clob => TypeMapping::lossless("TEXT"),
            CanonicalType::Blob => TypeMapping::lossless("BYTEA"),
            CanonicalType::Date => TypeMapping::lossless("DATE"),
            CanonicalType::Time => TypeMapping::lossless("TIME"),
            CanonicalType::DateTime => TypeMapping::lossless("TIMESTAMP"),
            CanonicalType::DateTimeTz => TypeMapping::lossless("TIMESTAMPTZ"),
            CanonicalType::Json => TypeMapping::lossless("JSONB"),
            CanonicalType::Uuid => TypeMapping::lossless("UUID"),
            CanonicalType::Enum(_) => {
                TypeMapping::lossy("TEXT", "enum values not enforced on postgres")
            }
            CanonicalType::BinaryFixed(_) => {
                TypeMapping::lossy("BYTEA", "fixed binary width not enforced")
            }
            CanonicalType::Unknown(_) => {
                TypeMapping::lossy("TEXT", "unmapped source type stored as text")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integers() {
        let d = PostgresDialect;
        assert_eq!(
            d.to_canonical("integer").canonical,
            CanonicalType::Int4
        );
        assert_eq!(d.to_canonical("smallint").canonical, CanonicalType::Int2);
        assert_eq!(d.to_canonical("bigserial").canonical, CanonicalType::Int8);
    }

    #[test]
    fn test_varchar_with_length() {
        let d = PostgresDialect;
        assert_eq!(
            d.to_canonical("character varying(255)").canonical,
            CanonicalType::Text(Some(255))
        );
        assert_eq!(
            d.to_canonical("varchar(40)").canonical,
            CanonicalType::Text(Some(40))
        );
    }

    #[test]
    fn test_numeric_with_params() {
        let d = PostgresDialect;
        assert_eq!(
            d.to_canonical("numeric(18,4)").canonical,
            CanonicalType::Decimal {
                precision: 18,
                scale: 4
            }
        );
        // Unbounded numeric narrows and records loss.
        let info = d.to_canonical("numeric");
        assert!(info.loss.is_some());
    }

    #[test]
    fn test_timestamptz() {
        let d = PostgresDialect;
        let info = d.to_canonical("timestamp with time zone");
        assert_eq!(info.canonical, CanonicalType::DateTimeTz);
        assert!(info.loss.is_none());
    }

    #[test]
    fn test_unknown_type_flagged() {
        let d = PostgresDialect;
        let info = d.to_canonical("geometry");
        assert_eq!(
            info.canonical,
            CanonicalType::Unknown("geometry".to_string())
        );
        assert!(info.loss.is_some());
    }

    #[test]
    fn test_canonical_round_trip() {
        // from_canonical(to_canonical(s)) re-parses to the same canonical
        // with widths preserved.
        let d = PostgresDialect;
        for raw in [
            "smallint",
            "integer",
            "bigint",
            "real",
            "double precision",
            "numeric(18,4)",
            "varchar(255)",
            "text",
            "boolean",
            "bytea",
            "date",
            "time",
            "timestamp without time zone",
            "timestamp with time zone",
            "jsonb",
            "uuid",
        ] {
            let canonical = d.to_canonical(raw).canonical;
            let native = d.from_canonical(&canonical);
            assert!(!native.is_lossy, "{} became lossy", raw);
            let reparsed = d.to_canonical(&native.target_type).canonical;
            assert_eq!(reparsed, canonical, "round trip failed for {}", raw);
        }
    }
}
