//! Layered configuration
//!
//! Built-in defaults, then an optional TOML file, then `WPUP_*` environment
//! variables (`__` separates nested keys, e.g. `WPUP_DATABASE__URL`).

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::ingest::{IngestError, IngestResult, IngestSettings};
use crate::models::RecordField;

pub const DEFAULT_CONFIG_FILE: &str = "wpup-stats.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    #[serde(alias = "postgresql")]
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Metric names, see [`RecordField`]
    pub enabled_metrics: Vec<String>,
    /// Metric pairs written as `metric1:metric2`
    pub combinations: Vec<String>,
    pub max_consecutive_bad_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl DatabaseConfig {
    const fn default_max_connections() -> u32 {
        5
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load and validate; `path` replaces the default `wpup-stats.toml`
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config: Config = Self::layered(path)?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn layered(path: Option<&Path>) -> Result<config::Config, config::ConfigError> {
        let defaults = IngestSettings::default();
        let enabled: Vec<&str> = defaults
            .enabled_metrics
            .iter()
            .map(|field| field.as_str())
            .collect();
        let combinations: Vec<String> = defaults
            .combinations
            .iter()
            .map(|(first, second)| format!("{first}:{second}"))
            .collect();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .set_default("database.backend", "sqlite")?
            .set_default("database.url", "sqlite://./wpup-stats.db?mode=rwc")?
            .set_default(
                "database.max_connections",
                i64::from(DatabaseConfig::default_max_connections()),
            )?
            .set_default("ingest.enabled_metrics", enabled)?
            .set_default("ingest.combinations", combinations)?
            .set_default(
                "ingest.max_consecutive_bad_lines",
                defaults.max_consecutive_bad_lines as i64,
            )?
            .set_default("logging.level", "info")?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("WPUP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ingest.enabled_metrics")
                    .with_list_parse_key("ingest.combinations")
                    .try_parsing(true),
            )
            .build()
    }

    /// Reject anything that would only fail once ingestion has started
    pub fn validate(&self) -> IngestResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(IngestError::Configuration(
                "database url cannot be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(IngestError::Configuration(
                "database max_connections must be at least 1".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(IngestError::Configuration(format!(
                "invalid logging level '{}', must be one of {:?}",
                self.logging.level, LOG_LEVELS
            )));
        }
        self.ingest_settings().map(|_| ())
    }

    /// Typed ingestion settings
    pub fn ingest_settings(&self) -> IngestResult<IngestSettings> {
        let enabled_metrics = self
            .ingest
            .enabled_metrics
            .iter()
            .map(|name| parse_field(name))
            .collect::<IngestResult<Vec<_>>>()?;
        if let Some(repeated) = first_repeat(&enabled_metrics) {
            return Err(IngestError::Configuration(format!(
                "metric '{repeated}' is enabled more than once"
            )));
        }

        let combinations = self
            .ingest
            .combinations
            .iter()
            .map(|spec| {
                let (first, second) = spec.split_once(':').ok_or_else(|| {
                    IngestError::Configuration(format!(
                        "combination '{spec}' must look like metric1:metric2"
                    ))
                })?;
                Ok((parse_field(first)?, parse_field(second)?))
            })
            .collect::<IngestResult<Vec<_>>>()?;
        if let Some((first, second)) = first_repeat(&combinations) {
            return Err(IngestError::Configuration(format!(
                "combination '{first}:{second}' is listed more than once"
            )));
        }

        if self.ingest.max_consecutive_bad_lines == 0 {
            return Err(IngestError::Configuration(
                "max_consecutive_bad_lines must be at least 1".to_string(),
            ));
        }

        Ok(IngestSettings {
            enabled_metrics,
            combinations,
            max_consecutive_bad_lines: self.ingest.max_consecutive_bad_lines,
        })
    }
}

fn first_repeat<T: PartialEq>(items: &[T]) -> Option<&T> {
    items
        .iter()
        .enumerate()
        .find(|(index, item)| items[..*index].contains(*item))
        .map(|(_, item)| item)
}

fn parse_field(name: &str) -> IngestResult<RecordField> {
    name.trim().parse::<RecordField>().map_err(IngestError::Configuration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn defaults() -> Config {
        Config::layered(None).unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = defaults();
        config.validate().unwrap();
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ingest_settings().unwrap(), IngestSettings::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
backend = "postgres"
url = "postgres://localhost/wpup"

[ingest]
enabled_metrics = ["installed_version", "locale"]
combinations = ["php_version_aggregate:installed_version"]
max_consecutive_bad_lines = 5
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
        assert_eq!(config.database.max_connections, 5);

        let settings = config.ingest_settings().unwrap();
        assert_eq!(
            settings.enabled_metrics,
            vec![RecordField::InstalledVersion, RecordField::Locale]
        );
        assert_eq!(
            settings.combinations,
            vec![(RecordField::PhpVersionAggregate, RecordField::InstalledVersion)]
        );
        assert_eq!(settings.max_consecutive_bad_lines, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = defaults();
        config.ingest.enabled_metrics.push("colour".to_string());
        assert!(matches!(config.validate(), Err(IngestError::Configuration(_))));

        let mut config = defaults();
        config.ingest.combinations = vec!["installed_version".to_string()];
        assert!(matches!(config.validate(), Err(IngestError::Configuration(_))));

        let mut config = defaults();
        config.ingest.enabled_metrics = vec![
            "installed_version".to_string(),
            " installed_version".to_string(),
        ];
        assert!(matches!(config.validate(), Err(IngestError::Configuration(_))));

        let mut config = defaults();
        config.ingest.combinations.push(config.ingest.combinations[0].clone());
        assert!(matches!(config.validate(), Err(IngestError::Configuration(_))));

        let mut config = defaults();
        config.ingest.max_consecutive_bad_lines = 0;
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.database.url = " ".to_string();
        assert!(config.validate().is_err());
    }
}
