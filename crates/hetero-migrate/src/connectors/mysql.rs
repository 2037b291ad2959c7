//! MySQL target connector over mysql_async.
//!
//! Bulk loads run as a transactional batch insert; on batch failure the
//! transaction rolls back and the connector narrows to per-row inserts so
//! successful rows still land and each failure is classified for the DLQ.
//!
//! FK toggling is per-session in MySQL, so the connector records the
//! desired state and applies `SET FOREIGN_KEY_CHECKS` on every pooled
//! connection before it writes.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, Row as MysqlRow, TxOpts, Value};
use tracing::{info, warn};

use crate::config::TargetConfig;
use crate::core::traits::{
    encode_key, hash_row, AggregateFn, BulkLoadOutcome, KeyHash, RowError, SampleSpec, TableRef,
    TargetConnector,
};
use crate::core::value::{Row, SqlValue};
use crate::error::{LoadErrorKind, MigrateError, Result};

use super::sample_offsets;

/// Quote a MySQL identifier, doubling embedded backticks.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// The target database is the MySQL schema; `TableRef.schema` is unused
/// here because the pool is already bound to the database.
fn qualified(table: &TableRef) -> String {
    quote_ident(&table.name)
}

/// Convert an engine-neutral value to a mysql parameter value.
fn to_mysql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(v) => Value::Int(i64::from(*v)),
        SqlValue::I16(v) => Value::Int(i64::from(*v)),
        SqlValue::I32(v) => Value::Int(i64::from(*v)),
        SqlValue::I64(v) => Value::Int(*v),
        SqlValue::F32(v) => Value::Float(*v),
        SqlValue::F64(v) => Value::Double(*v),
        SqlValue::Decimal(v) => Value::Bytes(v.to_string().into_bytes()),
        SqlValue::Text(v) => Value::Bytes(v.clone().into_bytes()),
        SqlValue::Bytes(v) => Value::Bytes(v.clone()),
        SqlValue::Uuid(v) => Value::Bytes(v.hyphenated().to_string().into_bytes()),
        SqlValue::Json(v) => Value::Bytes(v.to_string().into_bytes()),
        SqlValue::Date(v) => Value::Date(v.year() as u16, v.month() as u8, v.day() as u8, 0, 0, 0, 0),
        SqlValue::Time(v) => Value::Time(
            false,
            0,
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1_000,
        ),
        SqlValue::DateTime(v) => Value::Date(
            v.year() as u16,
            v.month() as u8,
            v.day() as u8,
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.and_utc().timestamp_subsec_micros(),
        ),
        SqlValue::DateTimeTz(v) => {
            let utc = v.with_timezone(&Utc).naive_utc();
            Value::Date(
                utc.year() as u16,
                utc.month() as u8,
                utc.day() as u8,
                utc.hour() as u8,
                utc.minute() as u8,
                utc.second() as u8,
                utc.and_utc().timestamp_subsec_micros(),
            )
        }
    }
}

/// Convert one cell read back from MySQL into an engine-neutral value,
/// using column metadata to resolve the ambiguous `Bytes` payloads.
fn cell_value(row: &MysqlRow, idx: usize) -> SqlValue {
    const BINARY_CHARSET: u16 = 63;

    let Some(value) = row.as_ref(idx) else {
        return SqlValue::Null;
    };
    let column = &row.columns_ref()[idx];

    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::I64(*v),
        Value::UInt(v) => SqlValue::I64(*v as i64),
        Value::Float(v) => SqlValue::F32(*v),
        Value::Double(v) => SqlValue::F64(*v),
        Value::Bytes(bytes) => match column.column_type() {
            ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => {
                match std::str::from_utf8(bytes).ok().and_then(|s| s.parse().ok()) {
                    Some(decimal) => SqlValue::Decimal(decimal),
                    None => SqlValue::Null,
                }
            }
            ColumnType::MYSQL_TYPE_JSON => {
                match serde_json::from_slice::<serde_json::Value>(bytes) {
                    Ok(doc) => SqlValue::Json(doc),
                    Err(_) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
                }
            }
            _ if column.character_set() == BINARY_CHARSET => SqlValue::Bytes(bytes.clone()),
            _ => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        },
        Value::Date(y, mo, d, h, mi, s, us) => {
            match chrono::NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*mo), u32::from(*d))
                .and_then(|date| {
                    date.and_hms_micro_opt(
                        u32::from(*h),
                        u32::from(*mi),
                        u32::from(*s),
                        *us,
                    )
                }) {
                Some(dt) => SqlValue::DateTime(dt),
                None => SqlValue::Null,
            }
        }
        Value::Time(_neg, _days, h, m, s, us) => {
            match chrono::NaiveTime::from_hms_micro_opt(
                u32::from(*h),
                u32::from(*m),
                u32::from(*s),
                *us,
            ) {
                Some(t) => SqlValue::Time(t),
                None => SqlValue::Null,
            }
        }
    }
}

/// Classify a MySQL error for DLQ routing.
fn classify_error(error: &mysql_async::Error) -> LoadErrorKind {
    if let mysql_async::Error::Server(server) = error {
        return match server.code {
            // Duplicate keys, NULL constraints, FK violations.
            1022 | 1048 | 1062 | 1169 | 1451 | 1452 | 1557 | 1586 | 1761 | 1762 => {
                LoadErrorKind::ConstraintViolation
            }
            // Out of range, truncation, malformed temporal values.
            1264 | 1265 | 1292 | 1365 | 1406 => LoadErrorKind::TypeConversion,
            // Incorrect string value for the column charset.
            1366 => LoadErrorKind::Encoding,
            _ => LoadErrorKind::Unknown,
        };
    }
    LoadErrorKind::Unknown
}

/// MySQL target connector.
pub struct MysqlTarget {
    pool: Pool,
    fk_checks_enabled: AtomicBool,
}

impl MysqlTarget {
    /// Establish the pool and verify connectivity.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()))
            .into();
        let pool = Pool::new(opts);

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::connect("mysql", e.to_string()))?;
        conn.query_drop("SELECT 1").await?;
        info!(host = %config.host, database = %config.database, "mysql target connected");

        Ok(Self {
            pool,
            fk_checks_enabled: AtomicBool::new(true),
        })
    }

    /// Get a connection with the session FK setting applied.
    async fn conn(&self) -> Result<Conn> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::connect("mysql", e.to_string()))?;
        let enabled = i32::from(self.fk_checks_enabled.load(Ordering::Relaxed));
        conn.query_drop(format!("SET FOREIGN_KEY_CHECKS = {}", enabled))
            .await?;
        Ok(conn)
    }

    fn insert_statement(table: &TableRef, columns: &[String]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified(table),
            cols.join(", "),
            placeholders.join(", ")
        )
    }

    fn row_params(row: &Row) -> Params {
        Params::Positional(row.iter().map(to_mysql_value).collect())
    }
}

#[async_trait]
impl TargetConnector for MysqlTarget {
    fn engine(&self) -> &'static str {
        "mysql"
    }

    async fn exec_ddl(&self, statement: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        match conn.query_drop(statement).await {
            Ok(()) => Ok(()),
            Err(mysql_async::Error::Server(server))
                // 1050 table exists, 1061 duplicate key name: idempotent
                // re-runs skip what is already in place.
                if server.code == 1050 || server.code == 1061 =>
            {
                warn!(code = server.code, "ddl skipped (already exists)");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn bulk_load(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: Vec<Row>,
    ) -> Result<BulkLoadOutcome> {
        if rows.is_empty() {
            return Ok(BulkLoadOutcome::default());
        }
        let statement = Self::insert_statement(table, columns);
        let mut conn = self.conn().await?;

        // Fast path: one transactional batch.
        let mut tx = conn.start_transaction(TxOpts::default()).await?;
        let batch_result = tx
            .exec_batch(statement.as_str(), rows.iter().map(Self::row_params))
            .await;
        match batch_result {
            Ok(()) => {
                tx.commit().await?;
                return Ok(BulkLoadOutcome {
                    inserted: rows.len() as u64,
                    per_row_errors: Vec::new(),
                });
            }
            Err(e) => {
                tx.rollback().await?;
                warn!(table = %table.name, error = %e, "batch insert failed; narrowing to per-row");
            }
        }

        // Narrow path: insert row by row so good rows still land.
        let mut outcome = BulkLoadOutcome::default();
        for (row_index, row) in rows.iter().enumerate() {
            match conn
                .exec_drop(statement.as_str(), Self::row_params(row))
                .await
            {
                Ok(()) => outcome.inserted += 1,
                Err(e) => outcome.per_row_errors.push(RowError {
                    row_index,
                    kind: classify_error(&e),
                    detail: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        let mut conn = self.conn().await?;
        let count: Option<i64> = conn
            .query_first(format!("SELECT COUNT(*) FROM {}", qualified(table)))
            .await?;
        Ok(count.unwrap_or(0))
    }

    async fn aggregate(
        &self,
        table: &TableRef,
        column: &str,
        func: AggregateFn,
    ) -> Result<SqlValue> {
        let col = quote_ident(column);
        let expr = match func {
            AggregateFn::Sum => format!("COALESCE(SUM({}), 0)", col),
            AggregateFn::Min => format!("MIN({})", col),
            AggregateFn::Max => format!("MAX({})", col),
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {})", col),
        };
        let mut conn = self.conn().await?;
        let row: Option<MysqlRow> = conn
            .query_first(format!("SELECT {} FROM {}", expr, qualified(table)))
            .await?;
        Ok(row.map(|r| cell_value(&r, 0)).unwrap_or(SqlValue::Null))
    }

    async fn sample_hash(&self, table: &TableRef, spec: &SampleSpec) -> Result<Vec<KeyHash>> {
        let count = self.row_count(table).await?;
        let offsets = sample_offsets(count, spec.sample_rows, spec.seed);

        let select: Vec<String> = spec
            .pk_columns
            .iter()
            .chain(spec.columns.iter())
            .map(|c| quote_ident(c))
            .collect();
        let order: Vec<String> = spec.pk_columns.iter().map(|c| quote_ident(c)).collect();
        let base = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(", "),
            qualified(table),
            order.join(", ")
        );

        let key_width = spec.pk_columns.len();
        let total_width = key_width + spec.columns.len();
        let mut conn = self.conn().await?;
        let mut hashes = Vec::with_capacity(offsets.len());

        let mut collect = |row: &MysqlRow| {
            let values: Vec<SqlValue> = (0..total_width).map(|i| cell_value(row, i)).collect();
            hashes.push(KeyHash {
                key: encode_key(&values[..key_width]),
                hash: hash_row(&values[key_width..]),
            });
        };

        if count <= spec.sample_rows as i64 {
            let rows: Vec<MysqlRow> = conn.query(base).await?;
            for row in &rows {
                collect(row);
            }
        } else {
            for offset in offsets {
                let row: Option<MysqlRow> = conn
                    .query_first(format!("{} LIMIT 1 OFFSET {}", base, offset))
                    .await?;
                if let Some(row) = row {
                    collect(&row);
                }
            }
        }
        Ok(hashes)
    }

    async fn toggle_fk(&self, enabled: bool) -> Result<bool> {
        self.fk_checks_enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "fk enforcement toggled for subsequent loads");
        Ok(true)
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!(error = %e, "mysql pool disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_statement_shape() {
        let table = TableRef::new("", "users");
        let statement = MysqlTarget::insert_statement(
            &table,
            &["id".to_string(), "email".to_string()],
        );
        assert_eq!(
            statement,
            "INSERT INTO `users` (`id`, `email`) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_to_mysql_value_bool_and_uuid() {
        assert_eq!(to_mysql_value(&SqlValue::Bool(true)), Value::Int(1));
        let uuid: uuid::Uuid = "550E8400-E29B-41D4-A716-446655440000".parse().unwrap();
        match to_mysql_value(&SqlValue::Uuid(uuid)) {
            Value::Bytes(bytes) => {
                assert_eq!(bytes, b"550e8400-e29b-41d4-a716-446655440000".to_vec());
            }
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_to_mysql_value_datetimetz_converts_to_utc() {
        use chrono::TimeZone;
        let tz = chrono::FixedOffset::east_opt(5 * 3600).unwrap();
        let dt = tz.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        match to_mysql_value(&SqlValue::DateTimeTz(dt)) {
            Value::Date(y, mo, d, h, mi, s, _us) => {
                assert_eq!((y, mo, d, h, mi, s), (2024, 1, 1, 5, 0, 0));
            }
            other => panic!("expected date, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_defaults_unknown() {
        let error = mysql_async::Error::Driver(mysql_async::DriverError::PoolDisconnected);
        assert_eq!(classify_error(&error), LoadErrorKind::Unknown);
    }
}
