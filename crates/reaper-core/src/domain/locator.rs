//! Resource locators: the `(group, version, plural)` triple used to address a
//! kind through the generic cluster client.
//!
//! Pluralization is a heuristic. Irregular kinds (`Endpoints`, `Chaos`, ...)
//! need an entry in [`PluralOverrides`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("targetKind must not be empty")]
    EmptyKind,

    #[error("invalid targetAPIVersion {0:?}: expected \"group/version\" or \"version\"")]
    InvalidApiVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceLocator {
    group: String,
    version: String,
    resource: String,
}

impl ResourceLocator {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

/// Split an apiVersion on the first `/`. No slash means the core group.
pub fn split_api_version(api_version: &str) -> Result<(&str, &str), LocatorError> {
    let invalid = || LocatorError::InvalidApiVersion(api_version.to_string());
    match api_version.split_once('/') {
        None if api_version.is_empty() => Err(invalid()),
        None => Ok(("", api_version)),
        Some((group, version)) => {
            if group.is_empty() || version.is_empty() || version.contains('/') {
                Err(invalid())
            } else {
                Ok((group, version))
            }
        }
    }
}

/// Lower-cased plural of a kind: `y` → `ies`, `s`/`x`/`z` → `+es`, else `+s`.
pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with('z') {
        format!("{lower}es")
    } else {
        format!("{lower}s")
    }
}

/// Exact-match plural overrides, keyed by kind as written in policies.
#[derive(Debug, Clone, Default)]
pub struct PluralOverrides {
    by_kind: HashMap<String, String>,
}

impl PluralOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: impl Into<String>, plural: impl Into<String>) -> Self {
        self.by_kind.insert(kind.into(), plural.into());
        self
    }

    pub fn get(&self, kind: &str) -> Option<&str> {
        self.by_kind.get(kind).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl From<BTreeMap<String, String>> for PluralOverrides {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self {
            by_kind: map.into_iter().collect(),
        }
    }
}

/// Maps `(kind, apiVersion)` to a [`ResourceLocator`].
///
/// Pure apart from the injected override table: the same input always
/// yields the same locator.
#[derive(Debug, Clone, Default)]
pub struct LocatorResolver {
    overrides: PluralOverrides,
}

impl LocatorResolver {
    pub fn new(overrides: PluralOverrides) -> Self {
        Self { overrides }
    }

    pub fn resolve(&self, kind: &str, api_version: &str) -> Result<ResourceLocator, LocatorError> {
        if kind.is_empty() {
            return Err(LocatorError::EmptyKind);
        }
        let (group, version) = split_api_version(api_version)?;
        let resource = match self.overrides.get(kind) {
            Some(plural) => plural.to_string(),
            None => pluralize(kind),
        };
        Ok(ResourceLocator::new(group, version, resource))
    }
}
