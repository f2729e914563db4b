use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform that sent the update request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cms {
    #[serde(rename = "WP")]
    WordPress,
    #[serde(rename = "CP")]
    ClassicPress,
}

impl Cms {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cms::WordPress => "WP",
            Cms::ClassicPress => "CP",
        }
    }
}

impl fmt::Display for Cms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed and normalized update API request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Unix timestamp (UTC)
    pub timestamp: i64,
    pub ip: String,
    pub http_method: Option<String>,
    pub action: Option<String>,
    /// Plugin or theme slug, `-` when the request had none
    pub slug: String,
    pub installed_version: Option<String>,
    pub cms: Cms,
    pub cms_version: Option<String>,
    /// `<cms>/<major.minor>`, with an empty suffix when the version can't be bucketed
    pub cms_version_aggregate: String,
    pub php_version: Option<String>,
    pub php_version_aggregate: Option<String>,
    pub locale: Option<String>,
    pub site_url: Option<String>,
}

impl RequestRecord {
    /// Value of a metric field, `None` when the record doesn't carry it
    pub fn field(&self, field: RecordField) -> Option<&str> {
        match field {
            RecordField::InstalledVersion => self.installed_version.as_deref(),
            RecordField::Cms => Some(self.cms.as_str()),
            RecordField::CmsVersion => self.cms_version.as_deref(),
            RecordField::PhpVersion => self.php_version.as_deref(),
            RecordField::Action => self.action.as_deref(),
            RecordField::CmsVersionAggregate => Some(self.cms_version_aggregate.as_str()),
            RecordField::PhpVersionAggregate => self.php_version_aggregate.as_deref(),
            RecordField::Locale => self.locale.as_deref(),
            RecordField::HttpMethod => self.http_method.as_deref(),
        }
    }
}

/// Record fields that daily statistics can be grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    InstalledVersion,
    Cms,
    CmsVersion,
    PhpVersion,
    Action,
    CmsVersionAggregate,
    PhpVersionAggregate,
    Locale,
    HttpMethod,
}

impl RecordField {
    /// Metrics tracked when configuration doesn't say otherwise
    pub const DEFAULT_ENABLED: [RecordField; 7] = [
        RecordField::InstalledVersion,
        RecordField::Cms,
        RecordField::CmsVersion,
        RecordField::PhpVersion,
        RecordField::Action,
        RecordField::CmsVersionAggregate,
        RecordField::PhpVersionAggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::InstalledVersion => "installed_version",
            RecordField::Cms => "cms",
            RecordField::CmsVersion => "cms_version",
            RecordField::PhpVersion => "php_version",
            RecordField::Action => "action",
            RecordField::CmsVersionAggregate => "cms_version_aggregate",
            RecordField::PhpVersionAggregate => "php_version_aggregate",
            RecordField::Locale => "locale",
            RecordField::HttpMethod => "http_method",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installed_version" => Ok(RecordField::InstalledVersion),
            "cms" => Ok(RecordField::Cms),
            "cms_version" => Ok(RecordField::CmsVersion),
            "php_version" => Ok(RecordField::PhpVersion),
            "action" => Ok(RecordField::Action),
            "cms_version_aggregate" => Ok(RecordField::CmsVersionAggregate),
            "php_version_aggregate" => Ok(RecordField::PhpVersionAggregate),
            "locale" => Ok(RecordField::Locale),
            "http_method" => Ok(RecordField::HttpMethod),
            other => Err(format!("unknown metric field '{other}'")),
        }
    }
}

/// Name of the synthetic metric that counts every request for a slug
pub const TOTAL_HITS_METRIC: &str = "total_hits";
