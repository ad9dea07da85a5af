//! Loosely-typed access to resource documents.
//!
//! Target resources arrive as arbitrary JSON documents. Everything in this
//! module traverses them by field path and fails closed: a missing key, a
//! non-map intermediate or a value of the wrong type is reported as `None`,
//! never as a panic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A dotted field path such as `spec.ttlSecondsAfterFinished`.
///
/// Segments are map keys; sequences are not indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field path {0:?}: segments must be non-empty")]
pub struct FieldPathError(pub String);

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, FieldPathError> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if path.is_empty() || segments.iter().any(String::is_empty) {
            return Err(FieldPathError(path.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// Resolve this path inside `doc`.
    pub fn lookup<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        lookup(doc, self.segments())
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Walk `doc` through the given map keys.
pub fn lookup<'a, 'p>(doc: &'a Value, path: impl IntoIterator<Item = &'p str>) -> Option<&'a Value> {
    path.into_iter()
        .try_fold(doc, |current, key| current.as_object()?.get(key))
}

pub fn nested_str<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(doc, path.iter().copied())?.as_str()
}

pub fn nested_slice<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a [Value]> {
    lookup(doc, path.iter().copied())?
        .as_array()
        .map(Vec::as_slice)
}

pub fn nested_map<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Map<String, Value>> {
    lookup(doc, path.iter().copied())?.as_object()
}

/// A string field parsed as an RFC 3339 timestamp.
pub fn nested_timestamp(doc: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    nested_str(doc, path).and_then(parse_timestamp)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "spec": { "ttlSecondsAfterFinished": 60 },
            "metadata": { "annotations": { "ttl-seconds": "90" } },
            "status": {
                "completionTime": "2024-03-01T10:00:00Z",
                "conditions": [ { "type": "Succeeded" } ],
                "phase": 7
            }
        })
    }

    #[test]
    fn field_path_resolves_nested_values() {
        let path = FieldPath::parse("spec.ttlSecondsAfterFinished").unwrap();
        assert_eq!(path.lookup(&doc()), Some(&json!(60)));

        let path: FieldPath = "metadata.annotations.ttl-seconds".parse().unwrap();
        assert_eq!(path.lookup(&doc()), Some(&json!("90")));
        assert_eq!(path.to_string(), "metadata.annotations.ttl-seconds");
    }

    #[test]
    fn field_path_rejects_empty_segments() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("spec.").is_err());
        assert!(FieldPath::parse(".spec").is_err());
        assert!(FieldPath::parse("spec..ttl").is_err());
    }

    #[test]
    fn lookups_fail_closed() {
        let d = doc();
        // scalar in the middle of the path
        assert!(lookup(&d, ["spec", "ttlSecondsAfterFinished", "deeper"]).is_none());
        // wrong type at the leaf
        assert!(nested_str(&d, &["status", "phase"]).is_none());
        assert!(nested_slice(&d, &["status", "phase"]).is_none());
        assert!(nested_map(&d, &["status", "conditions"]).is_none());
        assert!(nested_str(&d, &["missing", "key"]).is_none());
    }

    #[test]
    fn timestamps_are_parsed_as_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            nested_timestamp(&doc(), &["status", "completionTime"]),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp("2024-03-01T12:00:00+02:00"),
            Some(expected)
        );
        assert!(parse_timestamp("yesterday").is_none());
    }
}
