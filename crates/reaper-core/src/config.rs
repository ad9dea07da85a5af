//! Controller configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{LocatorResolver, PluralOverrides};
use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaperConfig {
    /// Concurrent reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between watch registry refreshes.
    #[serde(default = "default_watch_refresh_interval_secs")]
    pub watch_refresh_interval_secs: u64,

    /// Timeout for each list, watch and delete call.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Exact-match plural overrides, keyed by kind (`Endpoints = "endpoints"`).
    #[serde(default)]
    pub plural_overrides: BTreeMap<String, String>,
}

/// Backoff for passes that fail as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_watch_refresh_interval_secs() -> u64 {
    30
}

fn default_client_timeout_secs() -> u64 {
    30
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_secs() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            watch_refresh_interval_secs: default_watch_refresh_interval_secs(),
            client_timeout_secs: default_client_timeout_secs(),
            retry: RetryConfig::default(),
            plural_overrides: BTreeMap::new(),
        }
    }
}

impl ReaperConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigFileError> {
        let zero = |field: &str| Err(ConfigFileError::Invalid(format!("{field} must be greater than zero")));
        if self.workers == 0 {
            return zero("workers");
        }
        if self.watch_refresh_interval_secs == 0 {
            return zero("watch_refresh_interval_secs");
        }
        if self.client_timeout_secs == 0 {
            return zero("client_timeout_secs");
        }
        if self.retry.base_delay_ms == 0 {
            return zero("retry.base_delay_ms");
        }
        if self.retry.max_delay_secs == 0 {
            return zero("retry.max_delay_secs");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigFileError::Invalid(
                "retry.multiplier must be a finite number >= 1.0".into(),
            ));
        }
        if let Some((kind, _)) = self
            .plural_overrides
            .iter()
            .find(|(kind, plural)| kind.is_empty() || plural.is_empty())
        {
            return Err(ConfigFileError::Invalid(format!(
                "plural override for {kind:?} must name a kind and a plural"
            )));
        }
        Ok(())
    }

    pub fn watch_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.watch_refresh_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn resolver(&self) -> LocatorResolver {
        LocatorResolver::new(PluralOverrides::from(self.plural_overrides.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_takes_defaults() {
        let config = ReaperConfig::from_toml("").unwrap();

        assert_eq!(config, ReaperConfig::default());
        assert_eq!(config.workers, 4);
        assert_eq!(config.watch_refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_sections_are_merged_with_defaults() {
        let config = ReaperConfig::from_toml(
            r#"
            workers = 8

            [retry]
            max_delay_secs = 60

            [plural_overrides]
            Endpoints = "endpoints"
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.client_timeout_secs, 30);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_secs, 60);

        let locator = config.resolver().resolve("Endpoints", "v1").unwrap();
        assert_eq!(locator.resource(), "endpoints");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = ReaperConfig::from_toml("workers = 0").unwrap_err();
        assert!(matches!(err, ConfigFileError::Invalid(msg) if msg.contains("workers")));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = ReaperConfig::from_toml("wokers = 2").unwrap_err();
        assert!(matches!(err, ConfigFileError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ReaperConfig::load("/nonexistent/reaper.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/reaper.toml"));
    }
}
