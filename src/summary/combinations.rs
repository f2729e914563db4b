//! Percentile summaries for pairs of metrics
//!
//! Storing every (platform version, plugin version) combination would take a
//! lot of space, so for each platform version only the plugin versions at the
//! 10th, 50th and 90th percentile of unique sites are kept.

use super::day::PairCount;
use super::index::{IndexError, MetricIndex};
use super::version::compare_versions;

/// 10th, 50th and 90th percentile, in tenths of the group total
const THRESHOLDS: [u64; 3] = [1, 5, 9];

/// Percentile buckets of metric2 for one (slug, metric1 value) group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercentileSummary {
    pub slug: String,
    pub metric1_value: String,
    pub p10: String,
    pub p50: String,
    pub p90: String,
}

/// Group distinct-site counts by (slug, metric1 value) and compute percentiles
pub fn summarize_pairs(counts: &[PairCount<'_>]) -> Result<Vec<PercentileSummary>, IndexError> {
    let mut index = MetricIndex::new(4)?;
    for count in counts {
        index.add(
            &[
                count.slug.to_string(),
                count.metric1_value.to_string(),
                count.metric2_value.to_string(),
            ],
            count.unique_sites,
        )?;
    }

    let mut summaries = Vec::new();
    for row in index.rows(2)? {
        let (Some(slug), Some(metric1_value)) = (row.keys.first(), row.keys.get(1)) else {
            continue;
        };
        let distribution: Vec<(&str, u64)> = row
            .value
            .leaves()
            .into_iter()
            .map(|(version, sites)| (version.as_str(), *sites))
            .collect();

        if let Some([p10, p50, p90]) = percentiles(distribution) {
            summaries.push(PercentileSummary {
                slug: slug.to_string(),
                metric1_value: metric1_value.to_string(),
                p10,
                p50,
                p90,
            });
        }
    }
    Ok(summaries)
}

/// Values at which the running site count first reaches 10%, 50% and 90% of the total
///
/// Values are walked in ascending version order. `None` for an empty group.
pub fn percentiles(mut distribution: Vec<(&str, u64)>) -> Option<[String; 3]> {
    distribution.sort_by(|(a, _), (b, _)| compare_versions(a, b));

    let total: u64 = distribution.iter().map(|(_, sites)| sites).sum();
    let mut found: Vec<String> = Vec::with_capacity(THRESHOLDS.len());
    let mut running = 0u64;

    for (value, sites) in &distribution {
        running += sites;
        while found.len() < THRESHOLDS.len()
            && running * 10 >= total * THRESHOLDS[found.len()]
        {
            found.push(value.to_string());
        }
        if found.len() == THRESHOLDS.len() {
            break;
        }
    }

    found.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn pair<'a>(slug: &'a str, m1: &'a str, m2: &'a str, sites: u64) -> PairCount<'a> {
        PairCount {
            slug,
            metric1_value: m1,
            metric2_value: m2,
            unique_sites: sites,
        }
    }

    #[test]
    fn test_percentiles_walk_versions_in_order() {
        let result = percentiles(vec![("1.10", 40), ("1.2", 10), ("1.9", 50)]).unwrap();
        // Sorted: 1.2 (10), 1.9 (60), 1.10 (100)
        assert_eq!(result, ["1.2".to_string(), "1.9".to_string(), "1.10".to_string()]);
    }

    #[test]
    fn test_single_value_fills_every_percentile() {
        let result = percentiles(vec![("2.0", 3)]).unwrap();
        assert_eq!(result, ["2.0".to_string(), "2.0".to_string(), "2.0".to_string()]);
        assert_eq!(percentiles(Vec::new()), None);
    }

    #[test]
    fn test_percentiles_are_monotonic_observed_values() {
        let distribution = vec![("1.0", 5), ("1.1", 1), ("1.2", 1), ("2.0", 7), ("2.1", 2)];
        let observed: Vec<&str> = distribution.iter().map(|(v, _)| *v).collect();
        let [p10, p50, p90] = percentiles(distribution).unwrap();

        assert_ne!(compare_versions(&p10, &p50), Ordering::Greater);
        assert_ne!(compare_versions(&p50, &p90), Ordering::Greater);
        for p in [&p10, &p50, &p90] {
            assert!(observed.contains(&p.as_str()));
        }
        assert_eq!((p10.as_str(), p50.as_str(), p90.as_str()), ("1.0", "2.0", "2.1"));
    }

    #[test]
    fn test_summarize_groups_by_slug_and_first_metric() {
        let counts = vec![
            pair("demo", "WP/6.4", "1.0", 1),
            pair("demo", "WP/6.4", "1.1", 9),
            pair("demo", "WP/6.3", "1.0", 4),
            pair("other", "WP/6.4", "3.0", 2),
        ];
        let summaries = summarize_pairs(&counts).unwrap();

        assert_eq!(summaries.len(), 3);
        let demo_64 = summaries
            .iter()
            .find(|s| s.slug == "demo" && s.metric1_value == "WP/6.4")
            .unwrap();
        assert_eq!(
            (demo_64.p10.as_str(), demo_64.p50.as_str(), demo_64.p90.as_str()),
            ("1.0", "1.1", "1.1")
        );
        let other = summaries.iter().find(|s| s.slug == "other").unwrap();
        assert_eq!(other.p50, "3.0");
    }
}
