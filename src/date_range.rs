use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;

/// Length of the default range, counted back from its end
pub const DEFAULT_SPAN_DAYS: u64 = 31;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateRangeError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Inclusive range of UTC calendar days with `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Bounds given in the wrong order are swapped
    pub fn new(first: NaiveDate, second: NaiveDate) -> Self {
        Self {
            start: first.min(second),
            end: first.max(second),
        }
    }

    /// Missing end defaults to yesterday (UTC), missing start to 31 days before the end
    pub fn from_optional(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self::from_optional_at(start, end, Utc::now().date_naive())
    }

    fn from_optional_at(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> Self {
        let end = end.unwrap_or_else(|| today.checked_sub_days(Days::new(1)).unwrap_or(today));
        let start = start.unwrap_or_else(|| {
            end.checked_sub_days(Days::new(DEFAULT_SPAN_DAYS))
                .unwrap_or(end)
        });
        Self::new(start, end)
    }

    /// Like [`from_optional`](Self::from_optional) with `YYYY-MM-DD` strings
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, DateRangeError> {
        let start = start.map(parse_day).transpose()?;
        let end = end.map(parse_day).transpose()?;
        Ok(Self::from_optional(start, end))
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end
    }

    /// Whole days between start and end; a single-day range has zero
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn duration_secs(&self) -> i64 {
        self.day_count() * SECONDS_PER_DAY
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every day in the range, oldest first
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }

    /// Every day in the range as `YYYY-MM-DD`
    pub fn date_keys(&self) -> Vec<String> {
        self.days().map(|day| day.format("%Y-%m-%d").to_string()).collect()
    }
}

/// Parse a `YYYY-MM-DD` day
pub fn parse_day(raw: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| DateRangeError::InvalidDate(raw.to_string()))
}

/// Unix timestamp of a day's UTC midnight
pub fn day_start_timestamp(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(raw: &str) -> NaiveDate {
        parse_day(raw).unwrap()
    }

    #[test]
    fn test_bounds_are_swapped() {
        let range = DateRange::new(day("2024-03-10"), day("2024-03-01"));
        assert_eq!(range.start_date(), day("2024-03-01"));
        assert_eq!(range.end_date(), day("2024-03-10"));
        assert_eq!(range.day_count(), 9);
        assert_eq!(range.duration_secs(), 9 * 86_400);
    }

    #[test]
    fn test_date_keys_are_inclusive() {
        let range = DateRange::new(day("2024-02-27"), day("2024-03-01"));
        assert_eq!(
            range.date_keys(),
            vec!["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01"]
        );

        let single = DateRange::new(day("2024-01-01"), day("2024-01-01"));
        assert_eq!(single.date_keys(), vec!["2024-01-01"]);
        assert_eq!(single.day_count(), 0);
    }

    #[test]
    fn test_defaults_end_yesterday() {
        let today = day("2024-05-15");
        let range = DateRange::from_optional_at(None, None, today);
        assert_eq!(range.end_date(), day("2024-05-14"));
        assert_eq!(range.start_date(), day("2024-04-13"));
        assert_eq!(range.day_count(), 31);

        let range = DateRange::from_optional_at(None, Some(day("2024-01-31")), today);
        assert_eq!(range.start_date(), day("2023-12-31"));

        // A start after the default end is swapped, not rejected
        let range = DateRange::from_optional_at(Some(day("2024-06-01")), None, today);
        assert_eq!(range.start_date(), day("2024-05-14"));
        assert_eq!(range.end_date(), day("2024-06-01"));
    }

    #[test]
    fn test_invalid_dates_are_rejected() {
        assert_eq!(
            DateRange::parse(Some("2024-13-01"), None),
            Err(DateRangeError::InvalidDate("2024-13-01".to_string()))
        );
        assert!(parse_day("yesterday").is_err());
    }

    #[test]
    fn test_day_start_timestamp() {
        assert_eq!(day_start_timestamp(day("2024-01-01")), 1_704_067_200);
        assert!(DateRange::new(day("2024-01-01"), day("2024-01-03")).contains(day("2024-01-02")));
    }
}
