use crate::models::{CombinationRow, CombinationSummary, DailyMetricRow, MetricPoint};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Relational store for aggregated statistics
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Create tables and indexes, seeding the metrics dictionary when it is empty
    async fn init(&self, seed_metrics: &[&str]) -> Result<()>;

    /// Metric name to id lookup table
    async fn metric_ids(&self) -> Result<HashMap<String, i64>>;

    /// Slug to id lookup table
    async fn slug_ids(&self) -> Result<HashMap<String, i64>>;

    /// Append a metric to the dictionary and return its id
    async fn insert_metric(&self, metric: &str) -> Result<i64>;

    /// Start the transaction that holds every write for one day
    async fn begin_day(&self) -> StorageResult<Box<dyn DayTransaction>>;

    /// Most recent day with stored statistics
    async fn last_processed_date(&self) -> Result<Option<NaiveDate>>;

    /// All known slugs
    async fn list_slugs(&self) -> Result<Vec<String>>;

    /// Daily values of one metric for a slug, oldest first; missing values read as `N/A`
    async fn metric_points(
        &self,
        slug: &str,
        metric: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MetricPoint>>;

    /// Stored percentiles for a day, most popular metric1 values first
    async fn version_combinations(
        &self,
        slug: &str,
        date: NaiveDate,
        metric1: &str,
        metric2: &str,
        limit: i64,
    ) -> Result<Vec<CombinationSummary>>;
}

/// Writes for a single day
///
/// Dropping the transaction without calling [`commit`](DayTransaction::commit)
/// rolls every write back.
#[async_trait]
pub trait DayTransaction: Send {
    /// Add a new slug and return its id
    async fn insert_slug(&mut self, slug: &str, last_seen_on: NaiveDate) -> StorageResult<i64>;

    /// Move a known slug's `last_seen_on` forward, never backward
    async fn touch_slug(&mut self, slug: &str, last_seen_on: NaiveDate) -> StorageResult<()>;

    /// Insert or replace the row with the same (date, slug, metric, value)
    async fn upsert_stat(&mut self, row: &DailyMetricRow) -> StorageResult<()>;

    /// Insert or replace the row with the same (date, slug, metric1, metric1 value, metric2)
    async fn upsert_combination(&mut self, row: &CombinationRow) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
