//! Read side: charts and derived numbers for one slug over a date range

pub mod chart;

pub use chart::{
    AreaChart, AreaRow, ChartOptions, ChartSeries, ChartSeriesBuilder, PieChart, PieSlice, Series,
    SeriesOrder, ValueColumn, NO_DATA_SERIES, OTHER_SERIES,
};

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use thiserror::Error;

use crate::date_range::DateRange;
use crate::models::{CombinationSummary, RecordField, TOTAL_HITS_METRIC};
use crate::storage::StatsStore;
use crate::summary::compare_versions_desc;

pub const ACTIVE_INSTALLS_SERIES: &str = "Unique sites";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("the number of days must be greater than zero")]
    InvalidDayCount,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Defaults used by [`Report::chart`]
pub fn report_chart_options() -> ChartOptions {
    ChartOptions {
        value_column: ValueColumn::UniqueSites,
        order: None,
        other_group_fraction: 0.15,
        group_day_threshold: 0.10,
        max_series: None,
    }
}

pub struct Report {
    store: Arc<dyn StatsStore>,
    slug: String,
    range: DateRange,
    charts: Cache<String, Arc<ChartSeries>>,
}

impl Report {
    pub fn new(store: Arc<dyn StatsStore>, slug: impl Into<String>, range: DateRange) -> Self {
        let charts = Cache::builder()
            .max_capacity(64)
            .time_to_live(Duration::from_secs(300))
            .build();
        Self {
            store,
            slug: slug.into(),
            range,
            charts,
        }
    }

    /// Chart of one metric, never cached
    pub async fn chart(&self, metric: &str, options: ChartOptions) -> ReportResult<ChartSeries> {
        let points = self
            .store
            .metric_points(
                &self.slug,
                metric,
                self.range.start_date(),
                self.range.end_date(),
            )
            .await?;
        Ok(ChartSeriesBuilder::new(self.range, options).build(&points))
    }

    async fn named_chart(
        &self,
        name: &str,
        metric: &str,
        options: ChartOptions,
        empty_series_name: Option<&str>,
    ) -> ReportResult<Arc<ChartSeries>> {
        if let Some(cached) = self.charts.get(name).await {
            return Ok(cached);
        }

        let mut chart = self.chart(metric, options).await?;
        if let Some(series_name) = empty_series_name {
            chart = chart.rename_empty_value_series(series_name);
        }
        let chart = Arc::new(chart);
        self.charts.insert(name.to_string(), Arc::clone(&chart)).await;
        Ok(chart)
    }

    pub async fn active_version_chart(&self) -> ReportResult<Arc<ChartSeries>> {
        let options = ChartOptions {
            order: Some(SeriesOrder::VersionsDescending),
            ..report_chart_options()
        };
        self.named_chart(
            "active_versions",
            RecordField::InstalledVersion.as_str(),
            options,
            None,
        )
        .await
    }

    pub async fn cms_version_chart(&self) -> ReportResult<Arc<ChartSeries>> {
        let options = ChartOptions {
            order: Some(SeriesOrder::VersionsDescending),
            other_group_fraction: 0.09,
            ..report_chart_options()
        };
        self.named_chart(
            "cms_versions",
            RecordField::CmsVersionAggregate.as_str(),
            options,
            None,
        )
        .await
    }

    pub async fn php_version_chart(&self) -> ReportResult<Arc<ChartSeries>> {
        let options = ChartOptions {
            order: Some(SeriesOrder::VersionsDescending),
            ..report_chart_options()
        };
        self.named_chart(
            "php_versions",
            RecordField::PhpVersionAggregate.as_str(),
            options,
            None,
        )
        .await
    }

    /// Requests per action; nothing is folded into "Other"
    pub async fn request_chart(&self) -> ReportResult<Arc<ChartSeries>> {
        let options = ChartOptions {
            value_column: ValueColumn::Requests,
            order: Some(SeriesOrder::CaseInsensitiveDescending),
            other_group_fraction: 0.0,
            ..report_chart_options()
        };
        self.named_chart("requests", RecordField::Action.as_str(), options, None)
            .await
    }

    pub async fn active_installs_chart(&self) -> ReportResult<Arc<ChartSeries>> {
        self.named_chart(
            "active_installs",
            TOTAL_HITS_METRIC,
            report_chart_options(),
            Some(ACTIVE_INSTALLS_SERIES),
        )
        .await
    }

    pub async fn total_requests(&self) -> ReportResult<u64> {
        let chart = self.request_chart().await?;
        Ok(chart.totals_by_date().values().sum())
    }

    /// Average daily unique sites over the last `days` days of the range
    pub async fn active_installs(&self, days: usize) -> ReportResult<f64> {
        if days == 0 {
            return Err(ReportError::InvalidDayCount);
        }
        let chart = self.active_installs_chart().await?;
        let totals = chart.totals_by_date();
        let recent: u64 = totals.values().rev().take(days).sum();
        Ok(recent as f64 / days as f64)
    }

    /// Change in unique sites from the first to the last day, per day of the range
    pub async fn installs_per_day(&self) -> ReportResult<f64> {
        let chart = self.active_installs_chart().await?;
        let totals = chart.totals_by_date();
        if totals.len() <= 1 {
            return Ok(0.0);
        }

        let first = totals.get(&self.range.start_date()).copied().unwrap_or(0) as f64;
        let last = totals.get(&self.range.end_date()).copied().unwrap_or(0) as f64;
        Ok((last - first) / totals.len() as f64)
    }

    pub async fn requests_per_site(&self) -> ReportResult<f64> {
        let chart = self.active_installs_chart().await?;
        let site_days: u64 = chart.totals_by_date().values().sum();
        let requests = self.total_requests().await?;
        if site_days > 0 && requests > 0 {
            Ok(requests as f64 / site_days as f64)
        } else {
            Ok(0.0)
        }
    }

    /// Stored percentiles for the last day of the range, newest metric1 value first
    pub async fn version_combinations(
        &self,
        metric1: &str,
        metric2: &str,
        limit: i64,
    ) -> ReportResult<Vec<CombinationSummary>> {
        let mut rows = self
            .store
            .version_combinations(&self.slug, self.range.end_date(), metric1, metric2, limit)
            .await?;
        rows.sort_by(|a, b| compare_versions_desc(&a.metric1_value, &b.metric1_value));
        Ok(rows)
    }
}
