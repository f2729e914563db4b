//! Chart series with rare values folded into an "Other" bucket

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::date_range::DateRange;
use crate::models::MetricPoint;
use crate::summary::compare_versions_desc;

pub const OTHER_SERIES: &str = "Other";
pub const NO_DATA_SERIES: &str = "No data";

/// Which stored count a chart plots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueColumn {
    UniqueSites,
    Requests,
}

impl ValueColumn {
    fn of(&self, point: &MetricPoint) -> u64 {
        match self {
            ValueColumn::UniqueSites => point.unique_sites,
            ValueColumn::Requests => point.requests,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesOrder {
    /// Newest version first
    VersionsDescending,
    /// Reverse alphabetical, ignoring case
    CaseInsensitiveDescending,
}

impl SeriesOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            SeriesOrder::VersionsDescending => compare_versions_desc(a, b),
            SeriesOrder::CaseInsensitiveDescending => b.to_lowercase().cmp(&a.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartOptions {
    pub value_column: ValueColumn,
    pub order: Option<SeriesOrder>,
    /// Largest share of the grand total the "Other" bucket may hold
    pub other_group_fraction: f64,
    /// A series reaching this share of any single day is never folded
    pub group_day_threshold: f64,
    /// Stop folding once this many named series remain
    pub max_series: Option<usize>,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            value_column: ValueColumn::UniqueSites,
            order: None,
            other_group_fraction: 0.20,
            group_day_threshold: 0.09,
            max_series: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: BTreeMap<NaiveDate, u64>,
}

impl Series {
    fn total(&self) -> u64 {
        self.values.values().sum()
    }
}

/// Area chart table: one row per day, one column per series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaChart {
    pub columns: Vec<String>,
    pub rows: Vec<AreaRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaRow {
    pub date: NaiveDate,
    pub values: Vec<u64>,
}

/// Pie chart table for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PieChart {
    pub label: String,
    pub date: Option<NaiveDate>,
    pub slices: Vec<PieSlice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PieSlice {
    pub name: String,
    pub value: u64,
}

pub struct ChartSeriesBuilder {
    range: DateRange,
    options: ChartOptions,
}

impl ChartSeriesBuilder {
    pub fn new(range: DateRange, options: ChartOptions) -> Self {
        Self { range, options }
    }

    /// Group stored points into chart series
    ///
    /// Groupable series are folded smallest first while the "Other" bucket
    /// stays within `other_group_fraction` of the grand total.
    pub fn build(&self, points: &[MetricPoint]) -> ChartSeries {
        let mut totals_by_date: BTreeMap<NaiveDate, u64> =
            self.range.days().map(|day| (day, 0)).collect();
        let mut series: Vec<Series> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for point in points {
            let Some(day_total) = totals_by_date.get_mut(&point.date) else {
                continue;
            };
            let count = self.options.value_column.of(point);
            *day_total += count;

            let position = *positions.entry(point.value.clone()).or_insert_with(|| {
                series.push(Series {
                    name: point.value.clone(),
                    values: BTreeMap::new(),
                });
                series.len() - 1
            });
            *series[position].values.entry(point.date).or_insert(0) += count;
        }

        let series = self.fold_rare(series, &totals_by_date);
        let mut chart = ChartSeries {
            range: self.range,
            series,
            totals_by_date,
        };

        if let Some(order) = self.options.order {
            chart.series.sort_by(|a, b| order.compare(&a.name, &b.name));
        }
        if chart.series.is_empty() {
            chart.series.push(Series {
                name: NO_DATA_SERIES.to_string(),
                values: self.range.days().map(|day| (day, 0)).collect(),
            });
        }
        chart
    }

    fn fold_rare(&self, series: Vec<Series>, totals_by_date: &BTreeMap<NaiveDate, u64>) -> Vec<Series> {
        let grand_total: u64 = totals_by_date.values().sum();
        if grand_total == 0 {
            return series;
        }

        let groupable = |candidate: &Series| {
            candidate.values.iter().all(|(day, count)| {
                let day_total = totals_by_date.get(day).copied().unwrap_or(0);
                let share = if day_total > 0 {
                    *count as f64 / day_total as f64
                } else {
                    0.0
                };
                share < self.options.group_day_threshold
            })
        };

        let mut by_total: Vec<(usize, u64)> = series
            .iter()
            .enumerate()
            .map(|(index, s)| (index, s.total()))
            .collect();
        by_total.sort_by_key(|(_, total)| *total);

        let mut folded = vec![false; series.len()];
        let mut remaining = series.len();
        let mut other_total = 0u64;
        let mut other = BTreeMap::new();

        for (index, total) in by_total {
            if !groupable(&series[index]) {
                continue;
            }
            if self.options.max_series.is_some_and(|max| remaining <= max) {
                break;
            }
            if (other_total + total) as f64 / grand_total as f64 > self.options.other_group_fraction {
                break;
            }

            other_total += total;
            for (day, count) in &series[index].values {
                *other.entry(*day).or_insert(0) += count;
            }
            folded[index] = true;
            remaining -= 1;
        }

        let mut kept: Vec<Series> = series
            .into_iter()
            .zip(folded)
            .filter_map(|(s, was_folded)| (!was_folded).then_some(s))
            .collect();
        if other_total > 0 {
            kept.push(Series {
                name: OTHER_SERIES.to_string(),
                values: other,
            });
        }
        kept
    }
}

/// Named series over a date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartSeries {
    range: DateRange,
    series: Vec<Series>,
    totals_by_date: BTreeMap<NaiveDate, u64>,
}

impl ChartSeries {
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn series_names(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.name.as_str()).collect()
    }

    /// Sum over all series per day, before any folding; every day in the range is present
    pub fn totals_by_date(&self) -> &BTreeMap<NaiveDate, u64> {
        &self.totals_by_date
    }

    /// Give the series with an empty value a readable name
    pub fn rename_empty_value_series(mut self, name: &str) -> Self {
        for series in &mut self.series {
            if series.name.is_empty() {
                series.name = name.to_string();
            }
        }
        self
    }

    pub fn area_chart(&self) -> AreaChart {
        let rows = self
            .range
            .days()
            .map(|day| AreaRow {
                date: day,
                values: self
                    .series
                    .iter()
                    .map(|s| s.values.get(&day).copied().unwrap_or(0))
                    .collect(),
            })
            .collect();

        AreaChart {
            columns: self.series.iter().map(|s| s.name.clone()).collect(),
            rows,
        }
    }

    /// Slices for one day; negative `day_index` counts back from the last day
    pub fn pie_chart(&self, label: &str, day_index: isize) -> PieChart {
        let days: Vec<NaiveDate> = self.totals_by_date.keys().copied().collect();
        let position = if day_index < 0 {
            days.len().checked_sub(day_index.unsigned_abs())
        } else {
            Some(day_index.unsigned_abs()).filter(|index| *index < days.len())
        };
        let date = position.and_then(|index| days.get(index).copied());

        let mut slices: Vec<PieSlice> = self
            .series
            .iter()
            .rev()
            .map(|s| PieSlice {
                name: s.name.clone(),
                value: date.and_then(|day| s.values.get(&day).copied()).unwrap_or(0),
            })
            .collect();

        if slices.iter().all(|slice| slice.value == 0) {
            slices = vec![PieSlice {
                name: NO_DATA_SERIES.to_string(),
                value: 0,
            }];
        }

        PieChart {
            label: label.to_string(),
            date,
            slices,
        }
    }
}
