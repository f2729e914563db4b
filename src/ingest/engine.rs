use std::collections::HashMap;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    find_first_entry_by_timestamp, order_by_first_timestamp, IngestError, IngestResult,
    LogRecordParser, VirtualLogStream,
};
use crate::models::{CombinationRow, DailyMetricRow, RecordField, TOTAL_HITS_METRIC};
use crate::storage::{StatsStore, StorageError};
use crate::summary::{summarize_pairs, DaySummary};

pub const DEFAULT_MAX_CONSECUTIVE_BAD_LINES: usize = 30;

/// What gets aggregated and when a run of bad lines becomes fatal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub enabled_metrics: Vec<RecordField>,
    pub combinations: Vec<(RecordField, RecordField)>,
    pub max_consecutive_bad_lines: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            enabled_metrics: RecordField::DEFAULT_ENABLED.to_vec(),
            combinations: vec![
                (RecordField::CmsVersionAggregate, RecordField::InstalledVersion),
                (RecordField::PhpVersionAggregate, RecordField::InstalledVersion),
            ],
            max_consecutive_bad_lines: DEFAULT_MAX_CONSECUTIVE_BAD_LINES,
        }
    }
}

impl IngestSettings {
    /// Every metric name the engine writes, `total_hits` last
    pub fn metric_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        let combined = self
            .combinations
            .iter()
            .flat_map(|(first, second)| [*first, *second]);
        for field in self.enabled_metrics.iter().copied().chain(combined) {
            if !names.contains(&field.as_str()) {
                names.push(field.as_str());
            }
        }
        names.push(TOTAL_HITS_METRIC);
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfInput,
    ReachedUpperBound,
    /// No entry at or after the lower bound; nothing was read
    NoMatchingEntries,
}

/// Summary of one `parse` run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseOutcome {
    pub days_flushed: usize,
    pub lines_read: u64,
    pub records: u64,
    pub malformed_lines: u64,
    pub stop: StopReason,
}

impl ParseOutcome {
    fn new() -> Self {
        Self {
            days_flushed: 0,
            lines_read: 0,
            records: 0,
            malformed_lines: 0,
            stop: StopReason::EndOfInput,
        }
    }
}

/// Turns request logs into daily statistics
///
/// Records are staged for one UTC day at a time. When a record from a later
/// day arrives the staged day is written in a single transaction and the
/// buffer is cleared, so memory stays bounded by one day's distinct values.
/// Input must be in chronological order.
pub struct IngestionEngine {
    store: Arc<dyn StatsStore>,
    files: Vec<PathBuf>,
    parser: LogRecordParser,
    settings: IngestSettings,
    metric_ids: HashMap<String, i64>,
    slug_ids: HashMap<String, i64>,
    current_line: u64,
    consecutive_bad_lines: usize,
    current_day: Option<NaiveDate>,
    current_hour: Option<i64>,
    day: DaySummary,
}

impl IngestionEngine {
    /// Prepare the store and load the id dictionaries
    ///
    /// `files` are reordered oldest first. Metrics the settings enable that
    /// the store does not know yet are appended to its dictionary.
    pub async fn new<P: AsRef<Path>>(
        store: Arc<dyn StatsStore>,
        files: &[P],
        settings: IngestSettings,
    ) -> IngestResult<Self> {
        if files.is_empty() {
            return Err(IngestError::Configuration(
                "at least one log file is required".to_string(),
            ));
        }
        if settings.max_consecutive_bad_lines == 0 {
            return Err(IngestError::Configuration(
                "max_consecutive_bad_lines must be at least 1".to_string(),
            ));
        }

        let parser = LogRecordParser::new()?;
        let files = order_by_first_timestamp(files, &parser)?;

        let names = settings.metric_names();
        store.init(&names).await.map_err(StorageError::from)?;

        let mut metric_ids = store.metric_ids().await.map_err(StorageError::from)?;
        for name in names {
            if !metric_ids.contains_key(name) {
                let id = store.insert_metric(name).await.map_err(StorageError::from)?;
                info!("Registered new metric '{}'", name);
                metric_ids.insert(name.to_string(), id);
            }
        }
        let slug_ids = store.slug_ids().await.map_err(StorageError::from)?;

        let day = DaySummary::new(
            settings.enabled_metrics.clone(),
            settings.combinations.clone(),
        );

        Ok(Self {
            store,
            files,
            parser,
            settings,
            metric_ids,
            slug_ids,
            current_line: 0,
            consecutive_bad_lines: 0,
            current_day: None,
            current_hour: None,
            day,
        })
    }

    /// Log files in the order they are read
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Latest day with stored statistics, for incremental runs
    pub async fn last_processed_date(&self) -> IngestResult<Option<NaiveDate>> {
        Ok(self
            .store
            .last_processed_date()
            .await
            .map_err(StorageError::from)?)
    }

    /// Read the logs and store per-day statistics
    ///
    /// Only records with `from <= timestamp < to` are aggregated. When `from`
    /// is given the scan starts at the first entry at or after it. More than
    /// `max_consecutive_bad_lines` unparseable lines in a row abort the scan
    /// unless `ignore_consecutive_errors` is set; days flushed before the abort
    /// stay in the store.
    pub async fn parse(
        &mut self,
        from: Option<i64>,
        to: Option<i64>,
        ignore_consecutive_errors: bool,
    ) -> IngestResult<ParseOutcome> {
        let mut stream = VirtualLogStream::open(self.files.as_slice())?;
        let mut outcome = ParseOutcome::new();
        self.current_line = 0;
        self.consecutive_bad_lines = 0;
        self.current_day = None;
        self.current_hour = None;
        self.day.clear();

        if let Some(from) = from {
            match find_first_entry_by_timestamp(&mut stream, &self.parser, from)? {
                Some(offset) => {
                    debug!("First entry at or after {} is at offset {}", from, offset);
                    stream.seek(SeekFrom::Start(offset))?;
                }
                None => {
                    info!("No log entries found at or after the start timestamp {}", from);
                    outcome.stop = StopReason::NoMatchingEntries;
                    return Ok(outcome);
                }
            }
        }

        let mut tripped = None;
        while let Some(line) = stream.read_line()? {
            self.current_line += 1;
            outcome.lines_read += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record = match self.parser.parse_line(&line, self.current_line) {
                Ok(record) => {
                    self.consecutive_bad_lines = 0;
                    record
                }
                Err(err) => {
                    outcome.malformed_lines += 1;
                    self.consecutive_bad_lines += 1;
                    warn!("{}", err);

                    if self.consecutive_bad_lines > self.settings.max_consecutive_bad_lines
                        && !ignore_consecutive_errors
                    {
                        error!(
                            "Too many consecutive bad lines ({}), stopping. Use --ignore-bad-lines to continue past them",
                            self.consecutive_bad_lines
                        );
                        tripped = Some(IngestError::TooManyConsecutiveBadLines {
                            line_number: self.current_line,
                            count: self.consecutive_bad_lines,
                        });
                        break;
                    }
                    continue;
                }
            };

            if from.is_some_and(|from| record.timestamp < from) {
                continue;
            }
            if to.is_some_and(|to| record.timestamp >= to) {
                outcome.stop = StopReason::ReachedUpperBound;
                break;
            }

            let Some(date) = utc_date(record.timestamp) else {
                warn!(
                    "Timestamp {} on line #{} is out of range",
                    record.timestamp, self.current_line
                );
                continue;
            };

            match self.current_day {
                Some(open) if open == date => {}
                Some(open) => {
                    self.flush_day(open).await?;
                    outcome.days_flushed += 1;
                    self.open_day(date);
                }
                None => self.open_day(date),
            }

            self.report_hour(record.timestamp);
            self.day.record(&record);
            outcome.records += 1;
        }

        if let Some(open) = self.current_day.take() {
            self.flush_day(open).await?;
            outcome.days_flushed += 1;
        }

        match tripped {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    fn open_day(&mut self, date: NaiveDate) {
        info!("Processing {}", date);
        self.current_day = Some(date);
        self.current_hour = None;
    }

    fn report_hour(&mut self, timestamp: i64) {
        let hour = timestamp.rem_euclid(86_400) / 3_600;
        if self.current_hour != Some(hour) {
            debug!("Hour {:02}:00, line #{}", hour, self.current_line);
            self.current_hour = Some(hour);
        }
    }

    /// Write the staged day in one transaction
    ///
    /// The staging buffer and the slug cache only change after the commit
    /// succeeds. A failed write drops the transaction, which rolls it back.
    async fn flush_day(&mut self, date: NaiveDate) -> IngestResult<()> {
        let started = Instant::now();
        let lines = self.day.lines();
        let mut tx = self.store.begin_day().await?;

        let mut new_slugs: HashMap<String, i64> = HashMap::new();
        for (slug, last_seen) in self.day.slugs() {
            let seen_on = utc_date(last_seen).unwrap_or(date);
            if self.slug_ids.contains_key(slug) {
                tx.touch_slug(slug, seen_on).await?;
            } else {
                let id = tx.insert_slug(slug, seen_on).await?;
                new_slugs.insert(slug.to_string(), id);
            }
        }

        for count in self.day.stat_counts() {
            let slug_id = self
                .slug_ids
                .get(count.slug)
                .or_else(|| new_slugs.get(count.slug));
            let metric_id = self.metric_ids.get(count.metric.name());
            let (Some(&slug_id), Some(&metric_id)) = (slug_id, metric_id) else {
                continue;
            };

            tx.upsert_stat(&DailyMetricRow {
                date,
                slug_id,
                metric_id,
                value: count.value.map(str::to_string),
                requests: count.requests,
                unique_sites: count.unique_sites,
            })
            .await?;
        }

        for (index, (first, second)) in self.day.pairs().iter().enumerate() {
            let metric1 = self.metric_ids.get(first.as_str());
            let metric2 = self.metric_ids.get(second.as_str());
            let (Some(&metric1_id), Some(&metric2_id)) = (metric1, metric2) else {
                continue;
            };

            for summary in summarize_pairs(&self.day.pair_counts(index))? {
                let slug_id = self
                    .slug_ids
                    .get(&summary.slug)
                    .or_else(|| new_slugs.get(&summary.slug));
                let Some(&slug_id) = slug_id else {
                    continue;
                };

                tx.upsert_combination(&CombinationRow {
                    date,
                    slug_id,
                    metric1_id,
                    metric1_value: summary.metric1_value,
                    metric2_id,
                    percentile10th: summary.p10,
                    percentile50th: summary.p50,
                    percentile90th: summary.p90,
                })
                .await?;
            }
        }

        tx.commit().await?;

        self.slug_ids.extend(new_slugs);
        self.day.clear();
        info!(
            "Flushed {}: {} lines in {:.3}s",
            date,
            lines,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

fn utc_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|moment| moment.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = IngestSettings::default();
        assert_eq!(settings.enabled_metrics.len(), 7);
        assert_eq!(settings.max_consecutive_bad_lines, 30);
        assert_eq!(settings.combinations.len(), 2);
    }

    #[test]
    fn test_metric_names_are_unique_and_end_with_total_hits() {
        let settings = IngestSettings {
            enabled_metrics: vec![RecordField::Locale, RecordField::InstalledVersion],
            combinations: vec![(RecordField::CmsVersionAggregate, RecordField::InstalledVersion)],
            max_consecutive_bad_lines: 5,
        };
        assert_eq!(
            settings.metric_names(),
            vec!["locale", "installed_version", "cms_version_aggregate", "total_hits"]
        );
    }

    #[test]
    fn test_utc_date_uses_utc_midnight() {
        // 2024-01-01T23:59:59Z and 2024-01-02T00:00:00Z
        assert_eq!(utc_date(1_704_153_599), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(utc_date(1_704_153_600), NaiveDate::from_ymd_opt(2024, 1, 2));
    }
}
