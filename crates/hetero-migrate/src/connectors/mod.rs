//! Engine connectors and the registry mapping engine names to them.
//!
//! The registry is the single place that knows which concrete driver
//! backs an engine name; everything else holds `Arc<dyn SourceConnector>`
//! or `Arc<dyn TargetConnector>`.

pub mod mssql;
pub mod mysql;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::core::traits::{SourceConnector, TargetConnector};
use crate::error::{MigrateError, Result};

/// Supported source engines.
pub const SOURCE_ENGINES: &[&str] = &["postgres", "mssql"];

/// Supported target engines.
pub const TARGET_ENGINES: &[&str] = &["mysql"];

/// Connect the configured source engine.
pub async fn connect_source(config: &Config) -> Result<Arc<dyn SourceConnector>> {
    match config.source.engine.as_str() {
        "postgres" => Ok(Arc::new(
            postgres::PostgresSource::connect(&config.source).await?,
        )),
        "mssql" => Ok(Arc::new(mssql::MssqlSource::connect(&config.source).await?)),
        other => Err(MigrateError::Config(format!(
            "unknown source engine: {} (supported: {})",
            other,
            SOURCE_ENGINES.join(", ")
        ))),
    }
}

/// Connect the configured target engine.
pub async fn connect_target(config: &Config) -> Result<Arc<dyn TargetConnector>> {
    match config.target.engine.as_str() {
        "mysql" => Ok(Arc::new(mysql::MysqlTarget::connect(&config.target).await?)),
        other => Err(MigrateError::Config(format!(
            "unknown target engine: {} (supported: {})",
            other,
            TARGET_ENGINES.join(", ")
        ))),
    }
}

/// Seeded uniform sample of row ranks for L3 validation.
///
/// Both sides of a migration call this with the same seed; after L1 has
/// passed the row counts match, so both sides sample identical ranks.
pub(crate) fn sample_offsets(row_count: i64, sample_rows: usize, seed: u64) -> Vec<i64> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    if row_count <= 0 {
        return Vec::new();
    }
    if row_count <= sample_rows as i64 {
        return (0..row_count).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = BTreeSet::new();
    while picked.len() < sample_rows {
        picked.insert(rng.gen_range(0..row_count));
    }
    picked.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_offsets_deterministic() {
        let a = sample_offsets(1_000_000, 100, 42);
        let b = sample_offsets(1_000_000, 100, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sample_offsets_different_seeds_differ() {
        let a = sample_offsets(1_000_000, 100, 42);
        let b = sample_offsets(1_000_000, 100, 43);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sample_offsets_small_table_full_scan() {
        let offsets = sample_offsets(5, 1_000, 42);
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
        assert!(sample_offsets(0, 10, 1).is_empty());
    }
}
