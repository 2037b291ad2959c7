//! PostgreSQL source connector over tokio-postgres with a deadpool pool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::Type;
use tokio_postgres::NoTls;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::core::schema::{ColumnRole, ColumnSpec, ForeignKey, TableSpec};
use crate::core::traits::{
    encode_key, hash_row, AggregateFn, ChunkQuery, ColumnStats, KeyHash, SampleSpec,
    SourceConnector, TableRef,
};
use crate::core::value::{Row, SqlValue};
use crate::dialect::{PostgresDialect, TypeDialect};
use crate::error::{MigrateError, Result};

use super::sample_offsets;

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(table: &TableRef) -> String {
    if table.schema.is_empty() {
        quote_ident(&table.name)
    } else {
        format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
    }
}

/// Convert one cell of a result row into an engine-neutral value.
fn cell_value(row: &tokio_postgres::Row, idx: usize) -> SqlValue {
    let ty = row.columns()[idx].type_().clone();
    let converted: std::result::Result<SqlValue, tokio_postgres::Error> = if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(Into::into)
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx).map(Into::into)
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx).map(Into::into)
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(Into::into)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx).map(Into::into)
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(Into::into)
    } else if ty == Type::NUMERIC {
        row.try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map(Into::into)
    } else if ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx).map(Into::into)
    } else if ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(idx).map(Into::into)
    } else if ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx).map(Into::into)
    } else if ty == Type::TIME {
        row.try_get::<_, Option<chrono::NaiveTime>>(idx).map(Into::into)
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(Into::into)
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::FixedOffset>>>(idx)
            .map(Into::into)
    } else if ty == Type::JSON || ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| match v {
                Some(doc) => SqlValue::Json(doc),
                None => SqlValue::Null,
            })
    } else {
        row.try_get::<_, Option<String>>(idx).map(Into::into)
    };

    converted.unwrap_or_else(|e| {
        warn!(column = idx, error = %e, "unreadable value, treated as NULL");
        SqlValue::Null
    })
}

/// PostgreSQL source connector.
pub struct PostgresSource {
    pool: Pool,
}

impl PostgresSource {
    /// Establish the connection pool and verify connectivity.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.effective_port())
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let manager = Manager::from_config(
            pg,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(8)
            .build()
            .map_err(|e| MigrateError::connect("postgres", e.to_string()))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::connect("postgres", e.to_string()))?;
        client.simple_query("SELECT 1").await?;
        info!(host = %config.host, database = %config.database, "postgres source connected");
        Ok(Self { pool })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::connect("postgres", e.to_string()))
    }

    async fn describe_table(
        &self,
        client: &Object,
        schema: &str,
        name: &str,
    ) -> Result<TableSpec> {
        let dialect = PostgresDialect;

        let column_rows = client
            .query(
                "SELECT c.column_name, c.data_type,
                        c.character_maximum_length, c.numeric_precision,
                        c.numeric_scale, c.is_nullable, c.column_default
                 FROM information_schema.columns c
                 WHERE c.table_schema = $1 AND c.table_name = $2
                 ORDER BY c.ordinal_position",
                &[&schema, &name],
            )
            .await?;

        let pk_rows = client
            .query(
                "SELECT kcu.column_name
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                   AND tc.table_schema = kcu.table_schema
                 WHERE tc.table_schema = $1 AND tc.table_name = $2
                   AND tc.constraint_type = 'PRIMARY KEY'
                 ORDER BY kcu.ordinal_position",
                &[&schema, &name],
            )
            .await?;
        let primary_key: Vec<String> = pk_rows.iter().map(|r| r.get(0)).collect();

        let fk_rows = client
            .query(
                "SELECT tc.constraint_name, kcu.column_name,
                        ccu.table_name AS ref_table, ccu.column_name AS ref_column
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                   AND tc.table_schema = kcu.table_schema
                 JOIN information_schema.constraint_column_usage ccu
                   ON tc.constraint_name = ccu.constraint_name
                 WHERE tc.table_schema = $1 AND tc.table_name = $2
                   AND tc.constraint_type = 'FOREIGN KEY'
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&schema, &name],
            )
            .await?;
        let mut foreign_keys: BTreeMap<String, ForeignKey> = BTreeMap::new();
        for row in &fk_rows {
            let constraint: String = row.get(0);
            let entry = foreign_keys.entry(constraint).or_insert_with(|| ForeignKey {
                columns: Vec::new(),
                ref_table: row.get(2),
                ref_columns: Vec::new(),
            });
            entry.columns.push(row.get(1));
            entry.ref_columns.push(row.get(3));
        }

        let index_rows = client
            .query(
                "SELECT i.relname, a.attname, ix.indisunique
                 FROM pg_class t
                 JOIN pg_index ix ON t.oid = ix.indrelid
                 JOIN pg_class i ON i.oid = ix.indexrelid
                 JOIN pg_attribute a ON a.attrelid = t.oid
                   AND a.attnum = ANY(ix.indkey)
                 JOIN pg_namespace n ON n.oid = t.relnamespace
                 WHERE n.nspname = $1 AND t.relname = $2
                   AND NOT ix.indisprimary
                 ORDER BY i.relname, a.attnum",
                &[&schema, &name],
            )
            .await?;
        let mut unique_columns = Vec::new();
        let mut indexed_columns = Vec::new();
        for row in &index_rows {
            let column: String = row.get(1);
            let is_unique: bool = row.get(2);
            if is_unique {
                unique_columns.push(column);
            } else {
                indexed_columns.push(column);
            }
        }

        let estimate_row = client
            .query_opt(
                "SELECT GREATEST(c.reltuples::bigint, 0)
                 FROM pg_class c
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE n.nspname = $1 AND c.relname = $2",
                &[&schema, &name],
            )
            .await?;
        let row_count_estimate: i64 = estimate_row.map(|r| r.get(0)).unwrap_or(0);

        let columns = column_rows
            .iter()
            .map(|row| {
                let column_name: String = row.get(0);
                let data_type: String = row.get(1);
                let char_len: Option<i32> = row.get(2);
                let precision: Option<i32> = row.get(3);
                let scale: Option<i32> = row.get(4);
                let is_nullable: String = row.get(5);
                let default: Option<String> = row.get(6);

                // Reconstruct the parameterised native type string the way
                // the catalog would render it.
                let source_type_raw = match (char_len, &*data_type) {
                    (Some(n), _) => format!("{}({})", data_type, n),
                    (None, "numeric") | (None, "decimal") => match (precision, scale) {
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
                    nullable: is_nullable == "YES",
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

    fn aggregate_sql(table: &TableRef, column: &str, func: AggregateFn) -> String {
        let col = quote_ident(column);
        let expr = match func {
            AggregateFn::Sum => format!("COALESCE(SUM({}), 0)", col),
            AggregateFn::Min => format!("MIN({})", col),
            AggregateFn::Max => format!("MAX({})", col),
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {})", col),
        };
        format!("SELECT {} FROM {}", expr, qualified(table))
    }
}

#[async_trait]
impl SourceConnector for PostgresSource {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableSpec>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT table_name
                 FROM information_schema.tables
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&schema],
            )
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get(0);
            tables.push(self.describe_table(&client, schema, &name).await?);
        }
        Ok(tables)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", qualified(table)), &[])
            .await?;
        Ok(row.get(0))
    }

    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<Row>> {
        let client = self.client().await?;
        let select: Vec<String> = query.columns.iter().map(|c| quote_ident(c)).collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            select.join(", "),
            qualified(&query.table)
        );

        if let Some(cursor) = &query.after_key {
            sql.push_str(&format!(
                " WHERE {} > {} ORDER BY {} LIMIT {}",
                quote_ident(&cursor.column),
                cursor.last,
                quote_ident(&cursor.column),
                query.chunk_size
            ));
        } else {
            let order: Vec<String> = query.order_by.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(
                " ORDER BY {} LIMIT {} OFFSET {}",
                order.join(", "),
                query.chunk_size,
                query.offset
            ));
        }

        let rows = client.query(&sql, &[]).await?;
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
        let client = self.client().await?;
        let row = client
            .query_one(&Self::aggregate_sql(table, column, func), &[])
            .await?;
        Ok(cell_value(&row, 0))
    }

    async fn sample_hash(&self, table: &TableRef, spec: &SampleSpec) -> Result<Vec<KeyHash>> {
        let client = self.client().await?;
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

        let mut collect = |row: &tokio_postgres::Row| {
            let values: Vec<SqlValue> = (0..total_width).map(|i| cell_value(row, i)).collect();
            hashes.push(KeyHash {
                key: encode_key(&values[..key_width]),
                hash: hash_row(&values[key_width..]),
            });
        };

        if count <= spec.sample_rows as i64 {
            for row in &client.query(&base, &[]).await? {
                collect(row);
            }
        } else {
            for offset in offsets {
                let sql = format!("{} LIMIT 1 OFFSET {}", base, offset);
                if let Some(row) = client.query_opt(&sql, &[]).await? {
                    collect(&row);
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
        let client = self.client().await?;
        let mut stats = BTreeMap::new();
        for column in columns {
            let col = quote_ident(column);
            let sql = format!(
                "SELECT SUM(CASE WHEN {c} IS NULL THEN 1 ELSE 0 END)::float8
                          / GREATEST(COUNT(*), 1),
                        COUNT(DISTINCT {c}),
                        MIN({c})::text, MAX({c})::text
                 FROM {t}",
                c = col,
                t = qualified(table)
            );
            match client.query_one(&sql, &[]).await {
                Ok(row) => {
                    stats.insert(
                        column.clone(),
                        ColumnStats {
                            null_rate: row.get(0),
                            distinct_count: row.get(1),
                            min: row.get(2),
                            max: row.get(3),
                        },
                    );
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
        self.pool.close();
    }
}
