//! Microsoft SQL Server source connector over tiberius.
//!
//! tiberius has no built-in pooling; a small fixed set of clients is
//! opened up front and handed out round-robin behind mutexes, which is
//! enough for the table-level parallelism this pipeline runs at.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, ColumnType, Config as TiberiusConfig};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::core::schema::{ColumnRole, ColumnSpec, ForeignKey, TableSpec};
use crate::core::traits::{
    encode_key, hash_row, AggregateFn, ChunkQuery, ColumnStats, KeyHash, SampleSpec,
    SourceConnector, TableRef,
};
use crate::core::value::{Row, SqlValue};
use crate::dialect::{MssqlDialect, TypeDialect};
use crate::error::{MigrateError, Result};

use super::sample_offsets;

const POOL_SIZE: usize = 4;

type MssqlClient = Client<Compat<TcpStream>>;

/// Quote an MSSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn qualified(table: &TableRef) -> String {
    if table.schema.is_empty() {
        quote_ident(&table.name)
    } else {
        format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
    }
}

/// Escape a string literal for embedding in catalog queries.
fn quote_literal(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

/// Convert one cell of a tiberius row into an engine-neutral value.
fn cell_value(row: &tiberius::Row, idx: usize) -> SqlValue {
    let Some(column) = row.columns().get(idx) else {
        return SqlValue::Null;
    };

    fn get<'a, T: tiberius::FromSql<'a>>(row: &'a tiberius::Row, idx: usize) -> Option<T> {
        row.try_get::<T, _>(idx).ok().flatten()
    }

    match column.column_type() {
        ColumnType::Bit | ColumnType::Bitn => get::<bool>(row, idx).into(),
        ColumnType::Int1 => match get::<u8>(row, idx) {
            Some(v) => SqlValue::I16(i16::from(v)),
            None => SqlValue::Null,
        },
        ColumnType::Int2 => get::<i16>(row, idx).into(),
        ColumnType::Int4 => get::<i32>(row, idx).into(),
        ColumnType::Int8 => get::<i64>(row, idx).into(),
        ColumnType::Intn => get::<i64>(row, idx)
            .map(SqlValue::I64)
            .or_else(|| get::<i32>(row, idx).map(SqlValue::I32))
            .or_else(|| get::<i16>(row, idx).map(SqlValue::I16))
            .or_else(|| get::<u8>(row, idx).map(|v| SqlValue::I16(i16::from(v))))
            .unwrap_or(SqlValue::Null),
        ColumnType::Float4 => get::<f32>(row, idx).into(),
        ColumnType::Float8 => get::<f64>(row, idx).into(),
        ColumnType::Floatn => get::<f64>(row, idx)
            .map(SqlValue::F64)
            .or_else(|| get::<f32>(row, idx).map(SqlValue::F32))
            .unwrap_or(SqlValue::Null),
        ColumnType::Decimaln | ColumnType::Numericn => {
            get::<rust_decimal::Decimal>(row, idx).into()
        }
        ColumnType::Money | ColumnType::Money4 => get::<f64>(row, idx).into(),
        ColumnType::Guid => get::<uuid::Uuid>(row, idx).into(),
        ColumnType::Daten => get::<chrono::NaiveDate>(row, idx).into(),
        ColumnType::Timen => get::<chrono::NaiveTime>(row, idx).into(),
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => get::<chrono::NaiveDateTime>(row, idx).into(),
        ColumnType::DatetimeOffsetn => match get::<chrono::DateTime<chrono::Utc>>(row, idx) {
            Some(v) => SqlValue::DateTimeTz(v.fixed_offset()),
            None => SqlValue::Null,
        },
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
            get::<&[u8]>(row, idx).map(<[u8]>::to_vec).into()
        }
        _ => get::<&str>(row, idx).map(str::to_string).into(),
    }
}

/// MSSQL source connector with a fixed-size client pool.
pub struct MssqlSource {
    clients: Vec<Mutex<MssqlClient>>,
    next: AtomicUsize,
}

impl MssqlSource {
    async fn open_client(config: &SourceConfig) -> Result<MssqlClient> {
        let mut tib = TiberiusConfig::new();
        tib.host(&config.host);
        tib.port(config.effective_port());
        tib.database(&config.database);
        tib.authentication(AuthMethod::sql_server(&config.user, &config.password));
        tib.trust_cert();

        let tcp = TcpStream::connect(tib.get_addr())
            .await
            .map_err(|e| MigrateError::connect("mssql", e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| MigrateError::connect("mssql", e.to_string()))?;
        let client = Client::connect(tib, tcp.compat_write())
            .await
            .map_err(|e| MigrateError::connect("mssql", e.to_string()))?;
        Ok(client)
    }

    /// Open the pool and verify connectivity.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut clients = Vec::with_capacity(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            clients.push(Mutex::new(Self::open_client(config).await?));
        }
        info!(host = %config.host, database = %config.database, "mssql source connected");
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    async fn client(&self) -> MutexGuard<'_, MssqlClient> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[idx].lock().await
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<tiberius::Row>> {
        let mut client = self.client().await;
        let stream = client.simple_query(sql.to_string()).await?;
        Ok(stream.into_first_result().await?)
    }

    async fn describe_table(&self, schema: &str, name: &str) -> Result<TableSpec> {
        let dialect = MssqlDialect;
        let schema_lit = quote_literal(schema);
        let name_lit = quote_literal(name);

        let column_rows = self
            .query_rows(&format!(
                "SELECT c.COLUMN_NAME, c.DATA_TYPE, c.CHARACTER_MAXIMUM_LENGTH,
                        c.NUMERIC_PRECISION, c.NUMERIC_SCALE, c.IS_NULLABLE, c.COLUMN_DEFAULT
                 FROM INFORMATION_SCHEMA.COLUMNS c
                 WHERE c.TABLE_SCHEMA = {} AND c.TABLE_NAME = {}
                 ORDER BY c.ORDINAL_POSITION",
                schema_lit, name_lit
            ))
            .await?;

        let pk_rows = self
            .query_rows(&format!(
                "SELECT cu.COLUMN_NAME
                 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                 JOIN INFORMATION_SCHEMA.CONSTRAINT_COLUMN_USAGE cu
                   ON tc.CONSTRAINT_NAME = cu.CONSTRAINT_NAME
                 WHERE tc.TABLE_SCHEMA = {} AND tc.TABLE_NAME = {}
                   AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY'",
                schema_lit, name_lit
            ))
            .await?;
        let primary_key: Vec<String> = pk_rows
            .iter()
            .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten())
            .map(str::to_string)
            .collect();

        let fk_rows = self
            .query_rows(&format!(
                "SELECT fk.name,
                        COL_NAME(fkc.parent_object_id, fkc.parent_column_id),
                        OBJECT_NAME(fk.referenced_object_id),
                        COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id)
                 FROM sys.foreign_keys fk
                 JOIN sys.foreign_key_columns fkc
                   ON fk.object_id = fkc.constraint_object_id
                 WHERE OBJECT_SCHEMA_NAME(fk.parent_object_id) = {}
                   AND OBJECT_NAME(fk.parent_object_id) = {}
                 ORDER BY fk.name, fkc.constraint_column_id",
                schema_lit, name_lit
            ))
            .await?;
        let mut foreign_keys: BTreeMap<String, ForeignKey> = BTreeMap::new();
        for row in &fk_rows {
            let get_str = |i: usize| -> String {
                row.try_get::<&str, _>(i)
                    .ok()
                    .flatten()
                    .unwrap_or_default()
                    .to_string()
            };
            let entry = foreign_keys
                .entry(get_str(0))
                .or_insert_with(|| ForeignKey {
                    columns: Vec::new(),
                    ref_table: get_str(2),
                    ref_columns: Vec::new(),
                });
            entry.columns.push(get_str(1));
            entry.ref_columns.push(get_str(3));
        }

        let index_rows = self
            .query_rows(&format!(
                "SELECT COL_NAME(ic.object_id, ic.column_id), i.is_unique
                 FROM sys.indexes i
                 JOIN sys.index_columns ic
                   ON i.object_id = ic.object_id AND i.index_id = ic.index_id
                 WHERE OBJECT_SCHEMA_NAME(i.object_id) = {}
                   AND OBJECT_NAME(i.object_id) = {}
                   AND i.is_primary_key = 0 AND i.type > 0
                 ORDER BY i.name, ic.key_ordinal",
                schema_lit, name_lit
            ))
            .await?;
        let mut unique_columns = Vec::new();
        let mut indexed_columns = Vec::new();
        for row in &index_rows {
            let column = row
                .try_get::<&str, _>(0)
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_string();
            let is_unique = row.try_get::<bool, _>(1).ok().flatten().unwrap_or(false);
            if is_unique {
                unique_columns.push(column);
            } else {
                indexed_columns.push(column);
            }
        }

        let estimate_rows = self
            .query_rows(&format!(
                "SELECT CAST(SUM(p.rows) AS bigint)
                 FROM sys.partitions p
                 WHERE p.object_id = OBJECT_ID({} + '.' + {}) AND p.index_id IN (0, 1)",
                schema_lit, name_lit
            ))
            .await?;
        let row_count_estimate = estimate_rows
            .first()
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0);

        let columns = column_rows
            .iter()
            .map(|row| {
                let column_name = row
                    .try_get::<&str, _>(0)
                    .ok()
                    .flatten()
                    .unwrap_or_default()
                    .to_string();
                let data_type = row
                    .try_get::<&str, _>(1)
                    .ok()
                    .flatten()
                    .unwrap_or_default()
                    .to_lowercase();
                let char_len = row.try_get::<i32, _>(2).ok().flatten();
                let precision = row
                    .try_get::<u8, _>(3)
                    .ok()
                    .flatten()
                    .map(i32::from)
                    .or_else(|| row.try_get::<i32, _>(3).ok().flatten());
                let scale = row
                    .try_get::<i32, _>(4)
                    .ok()
                    .flatten()
                    .or_else(|| row.try_get::<u8, _>(4).ok().flatten().map(i32::from));
                let nullable = row
                    .try_get::<&str, _>(5)
                    .ok()
                    .flatten()
                    .map(|v| v == "YES")
                    .unwrap_or(true);
                let default = row
                    .try_get::<&str, _>(6)
                    .ok()
                    .flatten()
                    .map(str::to_string);

                let source_type_raw = match (char_len, data_type.as_str()) {
                    // -1 is how the catalog reports (max).
                    (Some(-1), _) => format!("{}(max)", data_type),
                    (Some(n), _) => format!("{}({})", data_type, n),
                    (None, "decimal") | (None, "numeric") => match (precision, scale) {
                        (Some(p), Some(s)) => format!("{}({},{})", data_type, p, s),
                        _ => data_type.clone(),
                    },
                    _ => data_type.clone(),
                };

                let role = if primary_key.contains(&column_name) {
                    ColumnRole::PrimaryKey
                } else if unique_columns.contains(&column_name) {
                    ColumnRole::Unique
                } else if indexed_columns.contains(&column_name) {
                    ColumnRole::Indexed
                } else {
                    ColumnRole::None
                };

                ColumnSpec {
                    canonical_type: dialect.to_canonical(&source_type_raw).canonical,
                    name: column_name,
                    source_type_raw,
                    nullable,
                    role,
                    default,
                    comment: String::new(),
                }
            })
            .collect();

        Ok(TableSpec {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            primary_key,
            foreign_keys: foreign_keys.into_values().collect(),
            row_count_estimate,
        })
    }
}

#[async_trait]
impl SourceConnector for MssqlSource {
    fn engine(&self) -> &'static str {
        "mssql"
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableSpec>> {
        let rows = self
            .query_rows(&format!(
                "SELECT t.TABLE_NAME
                 FROM INFORMATION_SCHEMA.TABLES t
                 WHERE t.TABLE_SCHEMA = {} AND t.TABLE_TYPE = 'BASE TABLE'
                 ORDER BY t.TABLE_NAME",
                quote_literal(schema)
            ))
            .await?;
        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten())
            .map(str::to_string)
            .collect();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            tables.push(self.describe_table(schema, &name).await?);
        }
        Ok(tables)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        let rows = self
            .query_rows(&format!(
                "SELECT COUNT_BIG(*) FROM {}",
                qualified(table)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0))
    }

    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<Row>> {
        let select: Vec<String> = query.columns.iter().map(|c| quote_ident(c)).collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            select.join(", "),
            qualified(&query.table)
        );

        if let Some(cursor) = &query.after_key {
            sql.push_str(&format!(
                " WHERE {} > {} ORDER BY {} OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY",
                quote_ident(&cursor.column),
                cursor.last,
                quote_ident(&cursor.column),
                query.chunk_size
            ));
        } else {
            let order: Vec<String> = query.order_by.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(
                " ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                order.join(", "),
                query.offset,
                query.chunk_size
            ));
        }

        let rows = self.query_rows(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| (0..query.columns.len()).map(|i| cell_value(row, i)).collect())
            .collect())
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
        let rows = self
            .query_rows(&format!("SELECT {} FROM {}", expr, qualified(table)))
            .await?;
        Ok(rows.first().map(|r| cell_value(r, 0)).unwrap_or(SqlValue::Null))
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
        let mut hashes = Vec::with_capacity(offsets.len());

        let mut collect = |row: &tiberius::Row| {
            let values: Vec<SqlValue> = (0..total_width).map(|i| cell_value(row, i)).collect();
            hashes.push(KeyHash {
                key: encode_key(&values[..key_width]),
                hash: hash_row(&values[key_width..]),
            });
        };

        if count <= spec.sample_rows as i64 {
            for row in &self
                .query_rows(&format!(
                    "{} OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY",
                    base, spec.sample_rows
                ))
                .await?
            {
                collect(row);
            }
        } else {
            for offset in offsets {
                let sql = format!("{} OFFSET {} ROWS FETCH NEXT 1 ROWS ONLY", base, offset);
                if let Some(row) = self.query_rows(&sql).await?.first() {
                    collect(row);
                }
            }
        }
        Ok(hashes)
    }

    async fn column_stats(
        &self,
        table: &TableRef,
        columns: &[String],
    ) -> Result<BTreeMap<String, ColumnStats>> {
        let mut stats = BTreeMap::new();
        for column in columns {
            let col = quote_ident(column);
            let sql = format!(
                "SELECT CAST(SUM(CASE WHEN {c} IS NULL THEN 1.0 ELSE 0 END)
                             / NULLIF(COUNT(*), 0) AS float),
                        COUNT(DISTINCT {c}),
                        CONVERT(nvarchar(max), MIN({c})),
                        CONVERT(nvarchar(max), MAX({c}))
                 FROM {t}",
                c = col,
                t = qualified(table)
            );
            match self.query_rows(&sql).await {
                Ok(rows) => {
                    let entry = rows
                        .first()
                        .map(|row| ColumnStats {
                            null_rate: row.try_get::<f64, _>(0).ok().flatten(),
                            distinct_count: row
                                .try_get::<i32, _>(1)
                                .ok()
                                .flatten()
                                .map(i64::from),
                            min: row
                                .try_get::<&str, _>(2)
                                .ok()
                                .flatten()
                                .map(str::to_string),
                            max: row
                                .try_get::<&str, _>(3)
                                .ok()
                                .flatten()
                                .map(str::to_string),
                        })
                        .unwrap_or_default();
                    stats.insert(column.clone(), entry);
                }
                Err(e) => {
                    warn!(table = %table, column = %column, error = %e, "stats query failed");
                    stats.insert(column.clone(), ColumnStats::default());
                }
            }
        }
        Ok(stats)
    }

    async fn close(&self) {
        // Clients close when dropped; tiberius has no explicit shutdown
        // that must run here.
    }
}
