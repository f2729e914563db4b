pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use trait_def::{DayTransaction, StatsStore, StorageError, StorageResult};

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::models::{MetricPoint, MetricPointRow};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

/// Open the configured backend
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn StatsStore>> {
    let store: Arc<dyn StatsStore> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStore::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStore::new(&config.url, config.max_connections).await?)
        }
    };
    Ok(store)
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid datestamp '{raw}' in store"))
}

pub(crate) fn into_points(rows: Vec<MetricPointRow>) -> Result<Vec<MetricPoint>> {
    rows.into_iter()
        .map(|row| {
            Ok(MetricPoint {
                date: parse_date(&row.datestamp)?,
                value: row.value,
                unique_sites: row.unique_sites.max(0) as u64,
                requests: row.requests.max(0) as u64,
            })
        })
        .collect()
}
