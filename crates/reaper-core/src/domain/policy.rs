//! Reaper policies: which kind to watch and under which TTL rule.
//!
//! Policies are owned by an external store; the engine only reads them.
//! Field names follow the cluster object (`targetKind`, `targetAPIVersion`, ...).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::document::FieldPath;
use super::errors::ConfigError;
use super::locator::{LocatorResolver, ResourceLocator};

pub const DEFAULT_TTL_FIELD_PATH: &str = "spec.ttlSecondsAfterFinished";
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperPolicy {
    pub name: String,
    pub spec: PolicySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub target_kind: String,

    #[serde(default, rename = "targetAPIVersion", alias = "targetApiVersion")]
    pub target_api_version: String,

    /// Empty or absent means every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_field_path: Option<String>,

    /// Seconds between periodic passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ReaperPolicy {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: PolicySpec {
                target_kind: kind.into(),
                target_api_version: api_version.into(),
                ..PolicySpec::default()
            },
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.spec.target_namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec
            .label_selector
            .get_or_insert_with(LabelSelector::default)
            .match_labels
            .insert(key.into(), value.into());
        self
    }

    pub fn with_ttl_field_path(mut self, path: impl Into<String>) -> Self {
        self.spec.ttl_field_path = Some(path.into());
        self
    }

    pub fn with_check_interval(mut self, secs: u64) -> Self {
        self.spec.check_interval = Some(secs);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.spec.enabled = Some(false);
        self
    }

    /// Period between passes, with the default applied.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(
            self.spec
                .check_interval
                .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS),
        )
    }

    /// Check required fields and resolve everything a pass needs.
    pub fn validate(&self, resolver: &LocatorResolver) -> Result<ValidatedPolicy, ConfigError> {
        let spec = &self.spec;
        if spec.target_kind.is_empty() {
            return Err(ConfigError::MissingField("targetKind"));
        }
        if spec.target_api_version.is_empty() {
            return Err(ConfigError::MissingField("targetAPIVersion"));
        }
        let locator = resolver.resolve(&spec.target_kind, &spec.target_api_version)?;

        let ttl_path = FieldPath::parse(
            spec.ttl_field_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_TTL_FIELD_PATH),
        )?;

        let check_interval = spec.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL_SECS);
        if check_interval == 0 {
            return Err(ConfigError::ZeroCheckInterval);
        }

        let scope = match spec.target_namespace.as_deref() {
            None | Some("") => NamespaceScope::All,
            Some(ns) => NamespaceScope::Single(ns.to_string()),
        };

        Ok(ValidatedPolicy {
            name: self.name.clone(),
            kind: spec.target_kind.clone(),
            api_version: spec.target_api_version.clone(),
            locator,
            scope,
            selector: spec.label_selector.clone().filter(|s| !s.is_empty()),
            ttl_path,
            check_interval: Duration::from_secs(check_interval),
            enabled: spec.enabled.unwrap_or(true),
        })
    }
}

/// `matchLabels` only; every listed pair must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }
}

/// Renders as a selector query string: `app=ci,team=data`.
impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&pairs.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    All,
    Single(String),
}

/// A policy whose fields have been checked and resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPolicy {
    pub name: String,
    pub kind: String,
    pub api_version: String,
    pub locator: ResourceLocator,
    pub scope: NamespaceScope,
    pub selector: Option<LabelSelector>,
    pub ttl_path: FieldPath,
    pub check_interval: Duration,
    pub enabled: bool,
}

/// Lifecycle of a policy inside the reconciliation loop.
///
/// State transitions:
/// - Unvalidated -> Active (successful pass)
/// - Unvalidated -> Failed (invalid spec; terminal until the policy is edited)
/// - Active -> Active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPhase {
    Unvalidated,
    Active,
    Failed,
}
