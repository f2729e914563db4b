use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the `stats` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMetricRow {
    pub date: NaiveDate,
    pub slug_id: i64,
    pub metric_id: i64,
    pub value: Option<String>,
    pub requests: u64,
    pub unique_sites: u64,
}

/// One row of the `combinations` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationRow {
    pub date: NaiveDate,
    pub slug_id: i64,
    pub metric1_id: i64,
    pub metric1_value: String,
    pub metric2_id: i64,
    pub percentile10th: String,
    pub percentile50th: String,
    pub percentile90th: String,
}

/// A stored daily value as read back for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub date: NaiveDate,
    pub value: String,
    pub unique_sites: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct MetricPointRow {
    pub datestamp: String,
    pub value: String,
    pub unique_sites: i64,
    pub requests: i64,
}

/// Stored percentiles for one metric1 value, joined with that value's unique sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CombinationSummary {
    pub metric1_value: String,
    pub percentile10th: Option<String>,
    pub percentile50th: Option<String>,
    pub percentile90th: Option<String>,
    pub unique_sites: Option<i64>,
}

/// Formats a day the way every date column stores it
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
