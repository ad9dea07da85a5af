//! Target instances: generic resources the reaper may delete.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{nested_map, nested_str, nested_timestamp};

/// `namespace/kind/name` — identity used for timer de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstanceError {
    #[error("object has no metadata.name")]
    MissingName,

    #[error("object has no kind")]
    MissingKind,
}

/// A live resource of some target kind.
///
/// The whole object document is kept so that status, TTL field and labels
/// can be read by path without a typed model.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInstance {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub object: Value,
}

impl TargetInstance {
    /// Build an instance from a full object document
    /// (`apiVersion`, `kind`, `metadata`, `spec`, `status`, ...).
    pub fn from_object(object: Value) -> Result<Self, InstanceError> {
        let name = nested_str(&object, &["metadata", "name"])
            .ok_or(InstanceError::MissingName)?
            .to_string();
        let kind = nested_str(&object, &["kind"])
            .ok_or(InstanceError::MissingKind)?
            .to_string();
        let api_version = nested_str(&object, &["apiVersion"])
            .unwrap_or_default()
            .to_string();
        let namespace = nested_str(&object, &["metadata", "namespace"])
            .unwrap_or_default()
            .to_string();
        let creation_timestamp = nested_timestamp(&object, &["metadata", "creationTimestamp"]);
        let labels = nested_map(&object, &["metadata", "labels"])
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            api_version,
            kind,
            namespace,
            name,
            creation_timestamp,
            labels,
            object,
        })
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.namespace, &self.kind, &self.name)
    }

    pub fn status(&self) -> Option<&Value> {
        self.object.get("status")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn from_object_reads_metadata() {
        let instance = TargetInstance::from_object(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": "nightly",
                "namespace": "batch",
                "creationTimestamp": "2024-03-01T09:00:00Z",
                "labels": { "team": "data", "weird": 3 }
            },
            "status": { "phase": "Succeeded" }
        }))
        .unwrap();

        assert_eq!(instance.key().to_string(), "batch/Job/nightly");
        assert_eq!(instance.api_version, "batch/v1");
        assert_eq!(
            instance.creation_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(instance.labels.get("team").map(String::as_str), Some("data"));
        // non-string label values are dropped
        assert!(!instance.labels.contains_key("weird"));
        assert_eq!(instance.status(), Some(&json!({ "phase": "Succeeded" })));
    }

    #[test]
    fn from_object_requires_name_and_kind() {
        let err = TargetInstance::from_object(json!({ "kind": "Job", "metadata": {} }))
            .unwrap_err();
        assert_eq!(err, InstanceError::MissingName);

        let err = TargetInstance::from_object(json!({ "metadata": { "name": "a" } }))
            .unwrap_err();
        assert_eq!(err, InstanceError::MissingKind);
    }
}
