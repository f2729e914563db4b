//! Running totals for the day that is currently being ingested

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{RecordField, RequestRecord, TOTAL_HITS_METRIC};

/// Metric a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKey {
    Field(RecordField),
    TotalHits,
}

impl MetricKey {
    pub fn name(&self) -> &'static str {
        match self {
            MetricKey::Field(field) => field.as_str(),
            MetricKey::TotalHits => TOTAL_HITS_METRIC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct StatKey {
    slug: String,
    metric: MetricKey,
    value: Option<String>,
}

#[derive(Debug, Default)]
struct Counter {
    requests: u64,
    sites: HashSet<u32>,
}

/// Aggregated counts for one (slug, metric, value) group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatCount<'a> {
    pub slug: &'a str,
    pub metric: MetricKey,
    pub value: Option<&'a str>,
    pub requests: u64,
    pub unique_sites: u64,
}

/// Distinct sites per (slug, metric1 value, metric2 value) for one metric pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCount<'a> {
    pub slug: &'a str,
    pub metric1_value: &'a str,
    pub metric2_value: &'a str,
    pub unique_sites: u64,
}

/// Staging buffer for a single day of requests
///
/// Site URLs are interned per day so the distinct-site sets hold small ids.
#[derive(Debug)]
pub struct DaySummary {
    fields: Vec<RecordField>,
    pairs: Vec<(RecordField, RecordField)>,
    site_ids: HashMap<String, u32>,
    counters: BTreeMap<StatKey, Counter>,
    pair_sites: Vec<HashMap<(String, String, String), HashSet<u32>>>,
    slugs: BTreeMap<String, i64>,
    lines: u64,
}

impl DaySummary {
    /// Repeated fields or pairs are kept once, in their first position
    pub fn new(fields: Vec<RecordField>, pairs: Vec<(RecordField, RecordField)>) -> Self {
        let fields = first_occurrences(fields);
        let pairs = first_occurrences(pairs);
        let pair_sites = pairs.iter().map(|_| HashMap::new()).collect();
        Self {
            fields,
            pairs,
            site_ids: HashMap::new(),
            counters: BTreeMap::new(),
            pair_sites,
            slugs: BTreeMap::new(),
            lines: 0,
        }
    }

    pub fn pairs(&self) -> &[(RecordField, RecordField)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Number of records staged since the last clear
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn record(&mut self, record: &RequestRecord) {
        self.lines += 1;

        let site = record.site_url.as_ref().map(|url| {
            let next_id = self.site_ids.len() as u32;
            *self.site_ids.entry(url.clone()).or_insert(next_id)
        });

        self.slugs
            .entry(record.slug.clone())
            .and_modify(|last_seen| *last_seen = (*last_seen).max(record.timestamp))
            .or_insert(record.timestamp);

        for field in &self.fields {
            let key = StatKey {
                slug: record.slug.clone(),
                metric: MetricKey::Field(*field),
                value: record.field(*field).map(str::to_string),
            };
            bump(&mut self.counters, key, site);
        }

        let total = StatKey {
            slug: record.slug.clone(),
            metric: MetricKey::TotalHits,
            value: Some(String::new()),
        };
        bump(&mut self.counters, total, site);

        for ((first, second), sites) in self.pairs.iter().zip(self.pair_sites.iter_mut()) {
            let (Some(value1), Some(value2)) = (record.field(*first), record.field(*second)) else {
                continue;
            };
            if !is_pair_value(value1) || !is_pair_value(value2) {
                continue;
            }
            let set = sites
                .entry((record.slug.clone(), value1.to_string(), value2.to_string()))
                .or_default();
            if let Some(site) = site {
                set.insert(site);
            }
        }
    }

    /// Slugs seen today with the timestamp of their latest request
    pub fn slugs(&self) -> impl Iterator<Item = (&str, i64)> {
        self.slugs.iter().map(|(slug, seen)| (slug.as_str(), *seen))
    }

    /// Counts per (slug, metric, value), ordered by slug then metric then value
    pub fn stat_counts(&self) -> impl Iterator<Item = StatCount<'_>> {
        self.counters.iter().map(|(key, counter)| StatCount {
            slug: &key.slug,
            metric: key.metric,
            value: key.value.as_deref(),
            requests: counter.requests,
            unique_sites: counter.sites.len() as u64,
        })
    }

    /// Distinct-site counts for the pair at `pair_index` in configuration order
    pub fn pair_counts(&self, pair_index: usize) -> Vec<PairCount<'_>> {
        let Some(sites) = self.pair_sites.get(pair_index) else {
            return Vec::new();
        };
        sites
            .iter()
            .map(|((slug, value1, value2), set)| PairCount {
                slug,
                metric1_value: value1,
                metric2_value: value2,
                unique_sites: set.len() as u64,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.site_ids.clear();
        self.counters.clear();
        for sites in &mut self.pair_sites {
            sites.clear();
        }
        self.slugs.clear();
        self.lines = 0;
    }
}

fn bump(counters: &mut BTreeMap<StatKey, Counter>, key: StatKey, site: Option<u32>) {
    let counter = counters.entry(key).or_default();
    counter.requests += 1;
    if let Some(site) = site {
        counter.sites.insert(site);
    }
}

fn first_occurrences<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !kept.contains(&item) {
            kept.push(item);
        }
    }
    kept
}

/// Empty values and `-` never take part in combinations
fn is_pair_value(value: &str) -> bool {
    !value.is_empty() && value != "-"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cms;

    fn record(slug: &str, version: &str, site: Option<&str>, timestamp: i64) -> RequestRecord {
        RequestRecord {
            timestamp,
            ip: "192.0.2.1".to_string(),
            http_method: Some("GET".to_string()),
            action: Some("get_metadata".to_string()),
            slug: slug.to_string(),
            installed_version: Some(version.to_string()),
            cms: Cms::WordPress,
            cms_version: Some("6.4.2".to_string()),
            cms_version_aggregate: "WP/6.4".to_string(),
            php_version: None,
            php_version_aggregate: None,
            locale: None,
            site_url: site.map(str::to_string),
        }
    }

    fn summary() -> DaySummary {
        DaySummary::new(
            vec![RecordField::InstalledVersion, RecordField::PhpVersion],
            vec![
                (RecordField::CmsVersionAggregate, RecordField::InstalledVersion),
                (RecordField::PhpVersionAggregate, RecordField::InstalledVersion),
            ],
        )
    }

    #[test]
    fn test_counts_requests_and_unique_sites() {
        let mut day = summary();
        day.record(&record("demo", "1.0", Some("a.example"), 10));
        day.record(&record("demo", "1.0", Some("a.example"), 20));
        day.record(&record("demo", "1.0", Some("b.example"), 30));
        day.record(&record("demo", "1.1", None, 40));

        let counts: Vec<_> = day.stat_counts().collect();
        let installed_1_0 = counts
            .iter()
            .find(|c| c.metric == MetricKey::Field(RecordField::InstalledVersion) && c.value == Some("1.0"))
            .unwrap();
        assert_eq!(installed_1_0.requests, 3);
        assert_eq!(installed_1_0.unique_sites, 2);

        let installed_1_1 = counts
            .iter()
            .find(|c| c.metric == MetricKey::Field(RecordField::InstalledVersion) && c.value == Some("1.1"))
            .unwrap();
        assert_eq!(installed_1_1.requests, 1);
        assert_eq!(installed_1_1.unique_sites, 0);

        let php = counts
            .iter()
            .find(|c| c.metric == MetricKey::Field(RecordField::PhpVersion))
            .unwrap();
        assert_eq!(php.value, None);
        assert_eq!(php.requests, 4);

        let total = counts.iter().find(|c| c.metric == MetricKey::TotalHits).unwrap();
        assert_eq!(total.value, Some(""));
        assert_eq!((total.requests, total.unique_sites), (4, 2));

        assert_eq!(day.slugs().collect::<Vec<_>>(), vec![("demo", 40)]);
    }

    #[test]
    fn test_repeated_fields_count_once() {
        let mut day = DaySummary::new(
            vec![RecordField::InstalledVersion, RecordField::InstalledVersion],
            vec![
                (RecordField::CmsVersionAggregate, RecordField::InstalledVersion),
                (RecordField::CmsVersionAggregate, RecordField::InstalledVersion),
            ],
        );
        day.record(&record("demo", "1.0", Some("a.example"), 10));

        let installed: Vec<_> = day
            .stat_counts()
            .filter(|c| c.metric == MetricKey::Field(RecordField::InstalledVersion))
            .collect();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].requests, 1);
        assert_eq!(day.pairs().len(), 1);
        assert_eq!(day.pair_counts(0).len(), 1);
    }

    #[test]
    fn test_pairs_skip_missing_values() {
        let mut day = summary();
        day.record(&record("demo", "1.0", Some("a.example"), 10));
        day.record(&record("demo", "-", Some("b.example"), 20));

        let cms_pairs = day.pair_counts(0);
        assert_eq!(cms_pairs.len(), 1);
        assert_eq!(cms_pairs[0].metric1_value, "WP/6.4");
        assert_eq!(cms_pairs[0].metric2_value, "1.0");
        assert_eq!(cms_pairs[0].unique_sites, 1);

        // No PHP version on any record
        assert!(day.pair_counts(1).is_empty());
        assert!(day.pair_counts(7).is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut day = summary();
        day.record(&record("demo", "1.0", Some("a.example"), 10));
        assert!(!day.is_empty());

        day.clear();
        assert!(day.is_empty());
        assert_eq!(day.stat_counts().count(), 0);
        assert_eq!(day.slugs().count(), 0);
        assert!(day.pair_counts(0).is_empty());
    }
}
