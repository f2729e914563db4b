use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use url::form_urlencoded;

use super::ParseError;
use crate::models::{Cms, RequestRecord};

/// Replacement for version numbers that are clearly invalid or obfuscated
pub const OBFUSCATED_VERSION: &str = "obfuscated";

const LINE_PATTERN: &str = r"^\[(?P<timestamp>[^\]]+)\]\s(?P<ip>\S+)\s+(?P<remainder>.+)$";
const NORMAL_VERSION_PATTERN: &str = r"^\d{1,2}\.\d";
const AGGREGATE_VERSION_PATTERN: &str = r"^(\d{1,2}\.\d{1,3})(?:\.|$)";

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S %z", "%d/%b/%Y:%H:%M:%S %z"];
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Positional tab-separated columns after the client IP
#[derive(Debug, Default)]
struct Columns<'a> {
    http_method: Option<&'a str>,
    action: Option<&'a str>,
    slug: Option<&'a str>,
    installed_version: Option<&'a str>,
    cms_version: Option<&'a str>,
    site_url: Option<&'a str>,
    query_string: Option<&'a str>,
}

impl<'a> Columns<'a> {
    fn split(remainder: &'a str) -> Self {
        let mut columns = Columns::default();
        for (index, value) in remainder.split('\t').enumerate() {
            let slot = match index {
                0 => &mut columns.http_method,
                1 => &mut columns.action,
                2 => &mut columns.slug,
                3 => &mut columns.installed_version,
                4 => &mut columns.cms_version,
                5 => &mut columns.site_url,
                6 => &mut columns.query_string,
                _ => break,
            };
            *slot = Some(value);
        }
        columns
    }
}

/// Parser for WP Update Server request log lines
///
/// The compiled patterns live on the parser instance, so each owner builds its
/// own and nothing is memoized process-wide.
#[derive(Debug, Clone)]
pub struct LogRecordParser {
    line_pattern: Regex,
    normal_version: Regex,
    aggregate_version: Regex,
}

impl LogRecordParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            line_pattern: Regex::new(LINE_PATTERN)?,
            normal_version: Regex::new(NORMAL_VERSION_PATTERN)?,
            aggregate_version: Regex::new(AGGREGATE_VERSION_PATTERN)?,
        })
    }

    /// Parse one raw log line
    ///
    /// `line_number` is only used to label the error.
    pub fn parse_line(&self, line: &str, line_number: u64) -> Result<RequestRecord, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fail = |reason: &str| ParseError {
            line_number,
            reason: reason.to_string(),
        };

        let captures = self
            .line_pattern
            .captures(line)
            .ok_or_else(|| fail("line does not match the request log format"))?;

        let timestamp = parse_timestamp(&captures["timestamp"])
            .ok_or_else(|| fail("unrecognized timestamp"))?;
        let ip = captures["ip"].to_string();
        let columns = Columns::split(captures.name("remainder").map_or("", |m| m.as_str()));

        let mut cms = Cms::WordPress;
        let mut cms_version = columns.cms_version.map(str::to_string);
        let mut php_version = None;
        let mut locale = None;

        if let Some(query_string) = columns.query_string.filter(|qs| !qs.is_empty()) {
            let parameters = query_parameters(query_string);

            if parameters
                .get("cms")
                .is_some_and(|value| value.contains("ClassicPress"))
            {
                cms = Cms::ClassicPress;
                // ClassicPress reports its own version through the site URL.
                if let Some(version) = columns.site_url.and_then(classicpress_version) {
                    cms_version = Some(version);
                }
            }

            php_version = parameters.get("php").cloned();
            locale = parameters.get("locale").cloned();
        }

        // Some sites obfuscate their version number or replace it with something
        // weird, so those get grouped together.
        if let Some(version) = cms_version.as_mut() {
            if version.is_empty() {
                *version = "-".to_string();
            }
            if version != "-" && !self.looks_like_normal_version(version) {
                *version = OBFUSCATED_VERSION.to_string();
            }
        }

        let cms_version_aggregate = format!(
            "{}/{}",
            cms,
            self.aggregate_version(cms_version.as_deref())
                .unwrap_or_default()
        );
        let php_version_aggregate = self.aggregate_version(php_version.as_deref());

        Ok(RequestRecord {
            timestamp,
            ip,
            http_method: columns.http_method.map(str::to_string),
            action: columns.action.map(str::to_string),
            slug: columns.slug.unwrap_or("-").to_string(),
            installed_version: columns.installed_version.map(str::to_string),
            cms,
            cms_version,
            cms_version_aggregate,
            php_version,
            php_version_aggregate,
            locale,
            site_url: columns.site_url.map(str::to_string),
        })
    }

    pub fn looks_like_normal_version(&self, version: &str) -> bool {
        self.normal_version.is_match(version)
    }

    /// Major and minor parts of a version number, e.g. "1.2.3-RC1" becomes "1.2"
    ///
    /// The obfuscated placeholder aggregates to itself; anything else that
    /// doesn't look like a version has no aggregate.
    pub fn aggregate_version(&self, version: Option<&str>) -> Option<String> {
        let version = version?;
        if let Some(captures) = self.aggregate_version.captures(version) {
            return Some(captures[1].to_string());
        }
        if version == OBFUSCATED_VERSION {
            return Some(version.to_string());
        }
        None
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.timestamp());
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp());
    }
    // Timestamps without an offset are UTC.
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|parsed| parsed.and_utc().timestamp())
}

/// URL-encoded key/value pairs; a repeated key keeps its last value
fn query_parameters(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// `ver` from the site URL's query string, when the site declares `wp_compatible`
fn classicpress_version(site_url: &str) -> Option<String> {
    let (_, query) = site_url.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    let parameters = query_parameters(query);

    let compatible = parameters
        .get("wp_compatible")
        .is_some_and(|flag| !flag.is_empty() && flag != "0");
    if !compatible {
        return None;
    }
    parameters.get("ver").cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LogRecordParser {
        LogRecordParser::new().unwrap()
    }

    const FULL_LINE: &str = "[2024-01-01 10:15:00 +0000] 192.0.2.10\tGET\tget_metadata\tdemo-plugin\t1.2.3\t6.4.2\thttps://a.example\tphp=8.1.27&locale=en_US";

    #[test]
    fn test_parse_full_line() {
        let record = parser().parse_line(FULL_LINE, 1).unwrap();

        assert_eq!(record.timestamp, 1704104100);
        assert_eq!(record.ip, "192.0.2.10");
        assert_eq!(record.http_method.as_deref(), Some("GET"));
        assert_eq!(record.action.as_deref(), Some("get_metadata"));
        assert_eq!(record.slug, "demo-plugin");
        assert_eq!(record.installed_version.as_deref(), Some("1.2.3"));
        assert_eq!(record.cms, Cms::WordPress);
        assert_eq!(record.cms_version.as_deref(), Some("6.4.2"));
        assert_eq!(record.cms_version_aggregate, "WP/6.4");
        assert_eq!(record.php_version.as_deref(), Some("8.1.27"));
        assert_eq!(record.php_version_aggregate.as_deref(), Some("8.1"));
        assert_eq!(record.locale.as_deref(), Some("en_US"));
        assert_eq!(record.site_url.as_deref(), Some("https://a.example"));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let parser = parser();
        assert_eq!(
            parser.parse_line(FULL_LINE, 1).unwrap(),
            parser.parse_line(FULL_LINE, 99).unwrap()
        );
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        let line = format!("{FULL_LINE}\r\n");
        let record = parser().parse_line(&line, 1).unwrap();
        assert_eq!(record.locale.as_deref(), Some("en_US"));
    }

    #[test]
    fn test_missing_columns_default() {
        let record = parser()
            .parse_line("[2024-01-01 00:00:00 +0000] 192.0.2.1\tGET\tdownload", 1)
            .unwrap();

        assert_eq!(record.slug, "-");
        assert_eq!(record.installed_version, None);
        assert_eq!(record.cms, Cms::WordPress);
        assert_eq!(record.cms_version, None);
        assert_eq!(record.cms_version_aggregate, "WP/");
        assert_eq!(record.php_version, None);
        assert_eq!(record.site_url, None);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = parser().parse_line("this is not a log entry", 42).unwrap_err();
        assert_eq!(err.line_number, 42);
        assert!(err.to_string().contains("#42"));
    }

    #[test]
    fn test_unparseable_timestamp_fails() {
        let result = parser().parse_line("[yesterday-ish] 192.0.2.1\tGET\tx\tslug", 3);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_cms_version_becomes_dash() {
        let record = parser()
            .parse_line("[2024-01-01 00:00:00 +0000] 192.0.2.1\tGET\tx\tslug\t1.0\t\thttps://a.example", 1)
            .unwrap();
        assert_eq!(record.cms_version.as_deref(), Some("-"));
        assert_eq!(record.cms_version_aggregate, "WP/");
    }

    #[test]
    fn test_strange_cms_version_is_obfuscated() {
        let record = parser()
            .parse_line("[2024-01-01 00:00:00 +0000] 192.0.2.1\tGET\tx\tslug\t1.0\tlatest\thttps://a.example", 1)
            .unwrap();
        assert_eq!(record.cms_version.as_deref(), Some(OBFUSCATED_VERSION));
        assert_eq!(record.cms_version_aggregate, "WP/obfuscated");
    }

    #[test]
    fn test_classicpress_overrides_version_from_site_url() {
        let line = "[2024-01-01 00:00:00 +0000] 192.0.2.1\tGET\tx\tslug\t1.0\t4.9.8\thttps://cp.example/?ver=1.5.3&wp_compatible=true\tcms=ClassicPress&php=7.4.3";
        let record = parser().parse_line(line, 1).unwrap();

        assert_eq!(record.cms, Cms::ClassicPress);
        assert_eq!(record.cms_version.as_deref(), Some("1.5.3"));
        assert_eq!(record.cms_version_aggregate, "CP/1.5");
        assert_eq!(record.php_version_aggregate.as_deref(), Some("7.4"));
    }

    #[test]
    fn test_classicpress_without_compat_flag_keeps_version() {
        let line = "[2024-01-01 00:00:00 +0000] 192.0.2.1\tGET\tx\tslug\t1.0\t4.9.8\thttps://cp.example/?ver=1.5.3\tcms=ClassicPress";
        let record = parser().parse_line(line, 1).unwrap();

        assert_eq!(record.cms, Cms::ClassicPress);
        assert_eq!(record.cms_version.as_deref(), Some("4.9.8"));
        assert_eq!(record.cms_version_aggregate, "CP/4.9");
    }

    #[test]
    fn test_other_cms_parameter_means_wordpress() {
        let line = "[2024-01-01 00:00:00 +0000] 192.0.2.1\tGET\tx\tslug\t1.0\t6.0\thttps://a.example\tcms=WordPress";
        assert_eq!(parser().parse_line(line, 1).unwrap().cms, Cms::WordPress);
    }

    #[test]
    fn test_aggregate_version() {
        let parser = parser();
        assert_eq!(parser.aggregate_version(Some("4.7.1")).as_deref(), Some("4.7"));
        assert_eq!(parser.aggregate_version(Some("4.7")).as_deref(), Some("4.7"));
        assert_eq!(parser.aggregate_version(Some("1.2.3-RC1")).as_deref(), Some("1.2"));
        assert_eq!(parser.aggregate_version(Some("0.9-beta")), None);
        assert_eq!(
            parser.aggregate_version(Some(OBFUSCATED_VERSION)).as_deref(),
            Some(OBFUSCATED_VERSION)
        );
        assert_eq!(parser.aggregate_version(None), None);
    }

    #[test]
    fn test_alternate_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-01-01 00:00:00"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01T01:00:00+01:00"), Some(1704067200));
        assert_eq!(parse_timestamp("01/Jan/2024:00:00:00 +0000"), Some(1704067200));
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
