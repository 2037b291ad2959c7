//! Microsoft SQL Server type dialect.

use super::canonical::{split_params, CanonicalInfo, CanonicalType, TypeDialect, TypeMapping};

/// MSSQL implementation of the canonical type functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

/// MSSQL reports `max` length as the literal string `max` or `-1`.
fn parse_length(args: &[String]) -> Option<u32> {
    let first = args.first()?;
    if first.eq_ignore_ascii_case("max") || first == "-1" {
        None
    } else {
        first.parse().ok()
    }
}

impl TypeDialect for MssqlDialect {
    fn engine(&self) -> &'static str {
        "mssql"
    }

    fn to_canonical(&self, raw: &str) -> CanonicalInfo {
        let (base, args) = split_params(raw);
        let base = base.to_ascii_lowercase();

        match base.as_str() {
            "bigint" => CanonicalInfo::lossless(CanonicalType::Int8),
            "int" => CanonicalInfo::lossless(CanonicalType::Int4),
            "smallint" => CanonicalInfo::lossless(CanonicalType::Int2),
            "tinyint" => CanonicalInfo::lossless(CanonicalType::Int1),
            "bit" => CanonicalInfo::lossless(CanonicalType::Bool),
            "decimal" | "numeric" => {
                let precision = args
                    .first()
                    .and_then(|a| a.parse::<u32>().ok())
                    .map(|p| p.min(65) as u8)
                    .unwrap_or(18);
                let scale = args
                    .get(1)
                    .and_then(|a| a.parse::<u32>().ok())
                    .map(|s| s.min(30) as u8)
                    .unwrap_or(0);
                CanonicalInfo::lossless(CanonicalType::Decimal { precision, scale })
            }
            "money" => CanonicalInfo::lossy(
                CanonicalType::Decimal {
                    precision: 19,
                    scale: 4,
                },
                "money formatting lost",
            ),
            "smallmoney" => CanonicalInfo::lossy(
                CanonicalType::Decimal {
                    precision: 10,
                    scale: 4,
                },
                "smallmoney formatting lost",
            ),
            "float" => CanonicalInfo::lossless(CanonicalType::Float8),
            "real" => CanonicalInfo::lossless(CanonicalType::Float4),
            "varchar" => match parse_length(&args) {
                Some(n) => CanonicalInfo::lossless(CanonicalType::Text(Some(n))),
                None => CanonicalInfo::lossless(CanonicalType::Clob),
            },
            "nvarchar" => match parse_length(&args) {
                Some(n) => CanonicalInfo::lossless(CanonicalType::NText(Some(n))),
                None => CanonicalInfo::lossless(CanonicalType::Clob),
            },
            "char" => CanonicalInfo::lossy(
                CanonicalType::Text(parse_length(&args)),
                "char_padding",
            ),
            "nchar" => CanonicalInfo::lossy(
                CanonicalType::NText(parse_length(&args)),
                "char_padding",
            ),
            "text" | "ntext" => CanonicalInfo::lossless(CanonicalType::Clob),
            "date" => CanonicalInfo::lossless(CanonicalType::Date),
            "time" => CanonicalInfo::lossless(CanonicalType::Time),
            "datetime" | "datetime2" => CanonicalInfo::lossless(CanonicalType::DateTime),
            "smalldatetime" => CanonicalInfo::lossy(
                CanonicalType::DateTime,
                "smalldatetime has minute precision",
            ),
            "datetimeoffset" => CanonicalInfo::lossless(CanonicalType::DateTimeTz),
            "binary" => CanonicalInfo::lossless(CanonicalType::BinaryFixed(
                parse_length(&args).unwrap_or(1),
            )),
            "varbinary" | "image" => CanonicalInfo::lossless(CanonicalType::Blob),
            "uniqueidentifier" => CanonicalInfo::lossless(CanonicalType::Uuid),
            "xml" => CanonicalInfo::lossy(CanonicalType::Clob, "xml stored as text"),
            _ => CanonicalInfo::lossy(
                CanonicalType::Unknown(raw.to_string()),
                format!("unmapped mssql type: {}", raw),
            ),
        }
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Int1 => TypeMapping::lossless("TINYINT"),
            CanonicalType::Int2 => TypeMapping::lossless("SMALLINT"),
            CanonicalType::Int4 => TypeMapping::lossless("INT"),
            CanonicalType::Int8 => TypeMapping::lossless("BIGINT"),
            CanonicalType::Float4 => TypeMapping::lossless("REAL"),
            CanonicalType::Float8 => TypeMapping::lossless("FLOAT"),
            CanonicalType::Decimal { precision, scale } => {
                TypeMapping::lossless(format!("DECIMAL({},{})", precision, scale))
            }
            CanonicalType::Bool => TypeMapping::lossless("BIT"),
            CanonicalType::Text(Some(n)) => TypeMapping::lossless(format!("VARCHAR({})", n)),
            CanonicalType::Text(None) => TypeMapping::lossless("VARCHAR(MAX)"),
            CanonicalType::NText(Some(n)) => TypeMapping::lossless(format!("NVARCHAR({})", n)),
            CanonicalType::NText(None) => TypeMapping::lossless("NVARCHAR(MAX)"),
            CanonicalType::Clob => TypeMapping::lossless("NVARCHAR(MAX)"),
            CanonicalType::Blob => TypeMapping::lossless("VARBINARY(MAX)"),
            CanonicalType::Date => TypeMapping::lossless("DATE"),
            CanonicalType::Time => TypeMapping::lossless("TIME"),
            CanonicalType::DateTime => TypeMapping::lossless("DATETIME2"),
            CanonicalType::DateTimeTz => TypeMapping::lossless("DATETIMEOFFSET"),
            CanonicalType::Json => {
                TypeMapping::lossy("NVARCHAR(MAX)", "json not validated by mssql")
            }
            CanonicalType::Uuid => TypeMapping::lossless("UNIQUEIDENTIFIER"),
            CanonicalType::Enum(_) => {
                TypeMapping::lossy("NVARCHAR(255)", "enum values not enforced on mssql")
            }
            CanonicalType::BinaryFixed(n) => TypeMapping::lossless(format!("BINARY({})", n)),
            CanonicalType::Unknown(_) => {
                TypeMapping::lossy("NVARCHAR(MAX)", "unmapped source type stored as text")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_types() {
        let d = MssqlDialect;
        assert_eq!(d.to_canonical("bit").canonical, CanonicalType::Bool);
        assert_eq!(d.to_canonical("tinyint").canonical, CanonicalType::Int1);
        assert_eq!(
            d.to_canonical("uniqueidentifier").canonical,
            CanonicalType::Uuid
        );
        assert_eq!(
            d.to_canonical("datetimeoffset").canonical,
            CanonicalType::DateTimeTz
        );
    }

    #[test]
    fn test_varchar_max_becomes_clob() {
        let d = MssqlDialect;
        assert_eq!(
            d.to_canonical("varchar(max)").canonical,
            CanonicalType::Clob
        );
        assert_eq!(
            d.to_canonical("nvarchar(-1)").canonical,
            CanonicalType::Clob
        );
        assert_eq!(
            d.to_canonical("nvarchar(100)").canonical,
            CanonicalType::NText(Some(100))
        );
    }

    #[test]
    fn test_money_is_lossy_decimal() {
        let d = MssqlDialect;
        let info = d.to_canonical("money");
        assert_eq!(
            info.canonical,
            CanonicalType::Decimal {
                precision: 19,
                scale: 4
            }
        );
        assert!(info.loss.is_some());
    }

    #[test]
    fn test_canonical_round_trip() {
        let d = MssqlDialect;
        for raw in [
            "bigint",
            "int",
            "smallint",
            "tinyint",
            "bit",
            "decimal(18,4)",
            "float",
            "real",
            "varchar(255)",
            "nvarchar(100)",
            "date",
            "time",
            "datetime2",
            "datetimeoffset",
            "binary(16)",
            "uniqueidentifier",
        ] {
            let canonical = d.to_canonical(raw).canonical;
            let native = d.from_canonical(&canonical);
            assert!(!native.is_lossy, "{} became lossy", raw);
            let reparsed = d.to_canonical(&native.target_type).canonical;
            assert_eq!(reparsed, canonical, "round trip failed for {}", raw);
        }
    }
}
