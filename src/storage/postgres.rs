use crate::models::{
    date_key, CombinationRow, CombinationSummary, DailyMetricRow, MetricPoint, MetricPointRow,
};
use crate::storage::{into_points, parse_date, DayTransaction, StatsStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl StatsStore for PostgresStore {
    async fn init(&self, seed_metrics: &[&str]) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                metric_id BIGSERIAL PRIMARY KEY,
                metric TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slugs (
                slug_id BIGSERIAL PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                last_seen_on TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stats (
                datestamp TEXT NOT NULL,
                slug_id BIGINT NOT NULL,
                metric_id BIGINT NOT NULL,
                value TEXT,
                requests BIGINT NOT NULL DEFAULT 0,
                unique_sites BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_stats_key ON stats(datestamp, slug_id, metric_id, value)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stats_slug_metric ON stats(slug_id, metric_id, datestamp)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS combinations (
                datestamp TEXT NOT NULL,
                slug_id BIGINT NOT NULL,
                metric1_id BIGINT NOT NULL,
                metric1_value TEXT NOT NULL,
                metric2_id BIGINT NOT NULL,
                percentile10th TEXT,
                percentile50th TEXT,
                percentile90th TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_combinations_key
            ON combinations(datestamp, slug_id, metric1_id, metric1_value, metric2_id)
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        let existing: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metrics")
            .fetch_one(self.pool.as_ref())
            .await?;
        if existing.0 == 0 {
            for metric in seed_metrics {
                self.insert_metric(metric).await?;
            }
        }

        Ok(())
    }

    async fn metric_ids(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>("SELECT metric, metric_id FROM metrics")
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn slug_ids(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>("SELECT slug, slug_id FROM slugs")
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_metric(&self, metric: &str) -> Result<i64> {
        sqlx::query("INSERT INTO metrics (metric) VALUES ($1) ON CONFLICT (metric) DO NOTHING")
            .bind(metric)
            .execute(self.pool.as_ref())
            .await?;

        let id: i64 = sqlx::query_scalar("SELECT metric_id FROM metrics WHERE metric = $1")
            .bind(metric)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(id)
    }

    async fn begin_day(&self) -> StorageResult<Box<dyn DayTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresDay { tx }))
    }

    async fn last_processed_date(&self) -> Result<Option<NaiveDate>> {
        let latest: Option<String> = sqlx::query_scalar("SELECT MAX(datestamp) FROM stats")
            .fetch_one(self.pool.as_ref())
            .await?;
        latest.as_deref().map(parse_date).transpose()
    }

    async fn list_slugs(&self) -> Result<Vec<String>> {
        let slugs: Vec<String> = sqlx::query_scalar("SELECT slug FROM slugs ORDER BY slug")
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(slugs)
    }

    async fn metric_points(
        &self,
        slug: &str,
        metric: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MetricPoint>> {
        let rows = sqlx::query_as::<_, MetricPointRow>(
            r#"
            SELECT st.datestamp, COALESCE(st.value, 'N/A') AS value, st.unique_sites, st.requests
            FROM stats st
            JOIN slugs sl ON sl.slug_id = st.slug_id
            JOIN metrics m ON m.metric_id = st.metric_id
            WHERE sl.slug = $1 AND m.metric = $2 AND st.datestamp BETWEEN $3 AND $4
            ORDER BY st.datestamp ASC, value ASC
            "#,
        )
        .bind(slug)
        .bind(metric)
        .bind(date_key(from))
        .bind(date_key(to))
        .fetch_all(self.pool.as_ref())
        .await?;

        into_points(rows)
    }

    async fn version_combinations(
        &self,
        slug: &str,
        date: NaiveDate,
        metric1: &str,
        metric2: &str,
        limit: i64,
    ) -> Result<Vec<CombinationSummary>> {
        let rows = sqlx::query_as::<_, CombinationSummary>(
            r#"
            SELECT c.metric1_value, c.percentile10th, c.percentile50th, c.percentile90th,
                   st.unique_sites
            FROM combinations c
            JOIN slugs sl ON sl.slug_id = c.slug_id
            JOIN metrics m1 ON m1.metric_id = c.metric1_id
            JOIN metrics m2 ON m2.metric_id = c.metric2_id
            LEFT JOIN stats st
                ON st.datestamp = c.datestamp
                AND st.slug_id = c.slug_id
                AND st.metric_id = c.metric1_id
                AND st.value = c.metric1_value
            WHERE sl.slug = $1 AND c.datestamp = $2 AND m1.metric = $3 AND m2.metric = $4
            ORDER BY st.unique_sites DESC NULLS LAST
            LIMIT $5
            "#,
        )
        .bind(slug)
        .bind(date_key(date))
        .bind(metric1)
        .bind(metric2)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }
}

struct PostgresDay {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DayTransaction for PostgresDay {
    async fn insert_slug(&mut self, slug: &str, last_seen_on: NaiveDate) -> StorageResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO slugs (slug, last_seen_on) VALUES ($1, $2) RETURNING slug_id",
        )
        .bind(slug)
        .bind(date_key(last_seen_on))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn touch_slug(&mut self, slug: &str, last_seen_on: NaiveDate) -> StorageResult<()> {
        sqlx::query(
            "UPDATE slugs SET last_seen_on = GREATEST(COALESCE(last_seen_on, $1), $1) WHERE slug = $2",
        )
        .bind(date_key(last_seen_on))
        .bind(slug)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_stat(&mut self, row: &DailyMetricRow) -> StorageResult<()> {
        let day = date_key(row.date);

        sqlx::query(
            r#"
            DELETE FROM stats
            WHERE datestamp = $1 AND slug_id = $2 AND metric_id = $3
              AND value IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(&day)
        .bind(row.slug_id)
        .bind(row.metric_id)
        .bind(row.value.as_deref())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stats (datestamp, slug_id, metric_id, value, requests, unique_sites)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&day)
        .bind(row.slug_id)
        .bind(row.metric_id)
        .bind(row.value.as_deref())
        .bind(row.requests as i64)
        .bind(row.unique_sites as i64)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_combination(&mut self, row: &CombinationRow) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO combinations (
                datestamp, slug_id, metric1_id, metric1_value, metric2_id,
                percentile10th, percentile50th, percentile90th
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (datestamp, slug_id, metric1_id, metric1_value, metric2_id) DO UPDATE SET
                percentile10th = EXCLUDED.percentile10th,
                percentile50th = EXCLUDED.percentile50th,
                percentile90th = EXCLUDED.percentile90th
            "#,
        )
        .bind(date_key(row.date))
        .bind(row.slug_id)
        .bind(row.metric1_id)
        .bind(&row.metric1_value)
        .bind(row.metric2_id)
        .bind(&row.percentile10th)
        .bind(&row.percentile50th)
        .bind(&row.percentile90th)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
