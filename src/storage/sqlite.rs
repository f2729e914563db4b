use crate::models::{
    date_key, CombinationRow, CombinationSummary, DailyMetricRow, MetricPoint, MetricPointRow,
};
use crate::storage::{into_points, parse_date, DayTransaction, StatsStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl StatsStore for SqliteStore {
    async fn init(&self, seed_metrics: &[&str]) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                metric_id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slugs (
                slug_id INTEGER PRIMARY KEY AUTOINCREMENT,
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
                slug_id INTEGER NOT NULL,
                metric_id INTEGER NOT NULL,
                value TEXT,
                requests INTEGER NOT NULL DEFAULT 0,
                unique_sites INTEGER NOT NULL DEFAULT 0
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
                slug_id INTEGER NOT NULL,
                metric1_id INTEGER NOT NULL,
                metric1_value TEXT NOT NULL,
                metric2_id INTEGER NOT NULL,
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

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics")
            .fetch_one(self.pool.as_ref())
            .await?;
        if existing == 0 {
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
        sqlx::query("INSERT INTO metrics (metric) VALUES (?) ON CONFLICT(metric) DO NOTHING")
            .bind(metric)
            .execute(self.pool.as_ref())
            .await?;

        let id: i64 = sqlx::query_scalar("SELECT metric_id FROM metrics WHERE metric = ?")
            .bind(metric)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(id)
    }

    async fn begin_day(&self) -> StorageResult<Box<dyn DayTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteDay { tx }))
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
            WHERE sl.slug = ? AND m.metric = ? AND st.datestamp BETWEEN ? AND ?
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
            WHERE sl.slug = ? AND c.datestamp = ? AND m1.metric = ? AND m2.metric = ?
            ORDER BY st.unique_sites DESC
            LIMIT ?
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

struct SqliteDay {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl DayTransaction for SqliteDay {
    async fn insert_slug(&mut self, slug: &str, last_seen_on: NaiveDate) -> StorageResult<i64> {
        let result = sqlx::query("INSERT INTO slugs (slug, last_seen_on) VALUES (?, ?)")
            .bind(slug)
            .bind(date_key(last_seen_on))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn touch_slug(&mut self, slug: &str, last_seen_on: NaiveDate) -> StorageResult<()> {
        let day = date_key(last_seen_on);
        sqlx::query("UPDATE slugs SET last_seen_on = MAX(COALESCE(last_seen_on, ?), ?) WHERE slug = ?")
            .bind(&day)
            .bind(&day)
            .bind(slug)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn upsert_stat(&mut self, row: &DailyMetricRow) -> StorageResult<()> {
        let day = date_key(row.date);

        // A NULL value never conflicts in a unique index, so replace by hand
        sqlx::query(
            "DELETE FROM stats WHERE datestamp = ? AND slug_id = ? AND metric_id = ? AND value IS ?",
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
            VALUES (?, ?, ?, ?, ?, ?)
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(datestamp, slug_id, metric1_id, metric1_value, metric2_id) DO UPDATE SET
                percentile10th = excluded.percentile10th,
                percentile50th = excluded.percentile50th,
                percentile90th = excluded.percentile90th
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let store = SqliteStore::new("sqlite::memory:", 1).await.unwrap();
        store.init(&["installed_version", "total_hits"]).await.unwrap();
        store
    }

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn stat(date: &str, slug_id: i64, metric_id: i64, value: Option<&str>, requests: u64) -> DailyMetricRow {
        DailyMetricRow {
            date: day(date),
            slug_id,
            metric_id,
            value: value.map(str::to_string),
            requests,
            unique_sites: requests,
        }
    }

    #[tokio::test]
    async fn test_init_seeds_metrics_once() {
        let store = memory_store().await;
        store.init(&["something_else"]).await.unwrap();

        let metrics = store.metric_ids().await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.contains_key("installed_version"));
        assert!(!metrics.contains_key("something_else"));

        let id = store.insert_metric("locale").await.unwrap();
        assert_eq!(store.insert_metric("locale").await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_upsert_stat_replaces_null_values() {
        let store = memory_store().await;
        let metric = store.metric_ids().await.unwrap()["installed_version"];

        for requests in [3, 5] {
            let known = store.slug_ids().await.unwrap();
            let mut tx = store.begin_day().await.unwrap();
            let slug = match known.get("demo") {
                Some(id) => *id,
                None => tx.insert_slug("demo", day("2024-01-01")).await.unwrap(),
            };
            tx.upsert_stat(&stat("2024-01-01", slug, metric, None, requests))
                .await
                .unwrap();
            tx.upsert_stat(&stat("2024-01-01", slug, metric, Some("1.0"), requests))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let points = store
            .metric_points("demo", "installed_version", day("2024-01-01"), day("2024-01-01"))
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.requests == 5));
        assert!(points.iter().any(|p| p.value == "N/A"));
        assert_eq!(store.last_processed_date().await.unwrap(), Some(day("2024-01-01")));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = memory_store().await;
        {
            let mut tx = store.begin_day().await.unwrap();
            tx.insert_slug("demo", day("2024-01-01")).await.unwrap();
        }
        assert!(store.list_slugs().await.unwrap().is_empty());
        assert_eq!(store.last_processed_date().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_touch_slug_only_moves_forward() {
        let store = memory_store().await;
        let mut tx = store.begin_day().await.unwrap();
        tx.insert_slug("demo", day("2024-01-05")).await.unwrap();
        tx.touch_slug("demo", day("2024-01-02")).await.unwrap();
        tx.commit().await.unwrap();

        let seen: Option<String> =
            sqlx::query_scalar("SELECT last_seen_on FROM slugs WHERE slug = 'demo'")
                .fetch_one(store.pool.as_ref())
                .await
                .unwrap();
        assert_eq!(seen.as_deref(), Some("2024-01-05"));

        let mut tx = store.begin_day().await.unwrap();
        tx.touch_slug("demo", day("2024-01-09")).await.unwrap();
        tx.commit().await.unwrap();
        let seen: Option<String> =
            sqlx::query_scalar("SELECT last_seen_on FROM slugs WHERE slug = 'demo'")
                .fetch_one(store.pool.as_ref())
                .await
                .unwrap();
        assert_eq!(seen.as_deref(), Some("2024-01-09"));
    }

    #[tokio::test]
    async fn test_combinations_upsert_and_join_sites() {
        let store = memory_store().await;
        let cms = store.insert_metric("cms_version_aggregate").await.unwrap();
        let installed = store.metric_ids().await.unwrap()["installed_version"];

        let mut tx = store.begin_day().await.unwrap();
        let slug = tx.insert_slug("demo", day("2024-01-01")).await.unwrap();
        tx.upsert_stat(&stat("2024-01-01", slug, cms, Some("WP/6.4"), 7))
            .await
            .unwrap();
        tx.upsert_stat(&stat("2024-01-01", slug, cms, Some("WP/6.3"), 2))
            .await
            .unwrap();
        for (value, p90) in [("WP/6.4", "1.0"), ("WP/6.4", "1.2"), ("WP/6.3", "0.9")] {
            tx.upsert_combination(&CombinationRow {
                date: day("2024-01-01"),
                slug_id: slug,
                metric1_id: cms,
                metric1_value: value.to_string(),
                metric2_id: installed,
                percentile10th: "0.9".to_string(),
                percentile50th: "1.0".to_string(),
                percentile90th: p90.to_string(),
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let rows = store
            .version_combinations(
                "demo",
                day("2024-01-01"),
                "cms_version_aggregate",
                "installed_version",
                10,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metric1_value, "WP/6.4");
        assert_eq!(rows[0].percentile90th.as_deref(), Some("1.2"));
        assert_eq!(rows[0].unique_sites, Some(7));
        assert_eq!(rows[1].unique_sites, Some(2));
    }
}
