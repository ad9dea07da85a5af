//! Completion classifier: decides whether a generic resource has finished.
//!
//! Finished signals, checked in order (first match wins):
//! 1. `status.phase` is `Succeeded`, `Failed` or `Completed`
//! 2. a `status.conditions[]` entry of type `Succeeded`/`Completed` with status `"True"`
//! 3. a parseable `status.completionTime`
//!
//! The completion instant is resolved separately and prefers
//! `status.completionTime`, then the matching condition's
//! `lastTransitionTime`. When neither exists the caller falls back to the
//! creation timestamp (see [`CompletionSource::CreationFallback`]).

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::document::{nested_slice, nested_str, nested_timestamp, parse_timestamp};

const FINISHED_PHASES: [&str; 3] = ["Succeeded", "Failed", "Completed"];
const FINISHED_CONDITION_TYPES: [&str; 2] = ["Succeeded", "Completed"];

/// Which heuristic declared the resource finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishSignal {
    Phase(String),
    Condition(String),
    CompletionTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Unfinished,
    Finished {
        signal: FinishSignal,
        /// `None` when the status carries no usable timestamp.
        completed_at: Option<DateTime<Utc>>,
    },
}

impl Completion {
    pub fn is_finished(&self) -> bool {
        matches!(self, Completion::Finished { .. })
    }
}

/// Where the TTL anchor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    CompletionTime,
    ConditionTransition,
    /// No timestamp in the status; the creation time stands in.
    /// This can delete a resource earlier than its real completion plus TTL.
    CreationFallback,
}

/// Classify a whole object document (the status is read from `status`).
pub fn classify(object: &Value) -> Completion {
    let Some(signal) = finish_signal(object) else {
        return Completion::Unfinished;
    };
    Completion::Finished {
        signal,
        completed_at: completion_instant(object).map(|(at, _)| at),
    }
}

fn finish_signal(object: &Value) -> Option<FinishSignal> {
    if let Some(phase) = nested_str(object, &["status", "phase"])
        && FINISHED_PHASES.contains(&phase)
    {
        return Some(FinishSignal::Phase(phase.to_string()));
    }
    // Any other phase is not authoritative; the later signals still apply.

    if let Some(condition) = finished_condition(object) {
        let kind = condition
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Some(FinishSignal::Condition(kind.to_string()));
    }

    nested_timestamp(object, &["status", "completionTime"]).map(|_| FinishSignal::CompletionTime)
}

/// First condition of a finished type whose status is `"True"`.
fn finished_condition(object: &Value) -> Option<&Value> {
    nested_slice(object, &["status", "conditions"])?
        .iter()
        .find(|condition| {
            let kind = condition.get("type").and_then(Value::as_str);
            let status = condition.get("status").and_then(Value::as_str);
            matches!((kind, status), (Some(k), Some("True")) if FINISHED_CONDITION_TYPES.contains(&k))
        })
}

/// Timestamp the status itself offers as the completion moment.
pub fn completion_instant(object: &Value) -> Option<(DateTime<Utc>, CompletionSource)> {
    if let Some(at) = nested_timestamp(object, &["status", "completionTime"]) {
        return Some((at, CompletionSource::CompletionTime));
    }
    finished_condition(object)
        .and_then(|condition| condition.get("lastTransitionTime"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|at| (at, CompletionSource::ConditionTransition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[rstest]
    #[case::succeeded("Succeeded")]
    #[case::failed("Failed")]
    #[case::completed("Completed")]
    fn finished_phases(#[case] phase: &str) {
        let completion = classify(&json!({ "status": { "phase": phase } }));
        assert_eq!(
            completion,
            Completion::Finished {
                signal: FinishSignal::Phase(phase.to_string()),
                completed_at: None,
            }
        );
    }

    #[rstest]
    #[case::running(json!({ "status": { "phase": "Running" } }))]
    #[case::no_status(json!({ "spec": {} }))]
    #[case::false_condition(json!({ "status": { "conditions": [ { "type": "Succeeded", "status": "False" } ] } }))]
    #[case::unknown_condition(json!({ "status": { "conditions": [ { "type": "Succeeded", "status": "Unknown" } ] } }))]
    #[case::other_condition_type(json!({ "status": { "conditions": [ { "type": "Ready", "status": "True" } ] } }))]
    #[case::unparseable_completion_time(json!({ "status": { "completionTime": "soon" } }))]
    #[case::conditions_not_a_list(json!({ "status": { "conditions": "Succeeded" } }))]
    fn unfinished_documents(#[case] object: Value) {
        assert_eq!(classify(&object), Completion::Unfinished);
    }

    #[rstest]
    #[case::succeeded("Succeeded")]
    #[case::completed("Completed")]
    fn true_condition_finishes_with_transition_time(#[case] kind: &str) {
        let completion = classify(&json!({
            "status": { "conditions": [
                { "type": "Ready", "status": "True", "lastTransitionTime": "2024-03-01T08:00:00Z" },
                { "type": kind, "status": "True", "lastTransitionTime": "2024-03-01T09:30:00Z" }
            ] }
        }));
        assert_eq!(
            completion,
            Completion::Finished {
                signal: FinishSignal::Condition(kind.to_string()),
                completed_at: Some(at(9, 30)),
            }
        );
    }

    #[test]
    fn completion_time_alone_is_a_finish_signal() {
        let completion = classify(&json!({ "status": { "completionTime": "2024-03-01T10:00:00Z" } }));
        assert_eq!(
            completion,
            Completion::Finished {
                signal: FinishSignal::CompletionTime,
                completed_at: Some(at(10, 0)),
            }
        );
    }

    #[test]
    fn completion_time_beats_condition_transition_time() {
        let object = json!({
            "status": {
                "completionTime": "2024-03-01T10:00:00Z",
                "conditions": [
                    { "type": "Succeeded", "status": "True", "lastTransitionTime": "2024-03-01T11:00:00Z" }
                ]
            }
        });
        let completion = classify(&object);
        assert_eq!(
            completion,
            Completion::Finished {
                signal: FinishSignal::Condition("Succeeded".to_string()),
                completed_at: Some(at(10, 0)),
            }
        );
        assert_eq!(
            completion_instant(&object),
            Some((at(10, 0), CompletionSource::CompletionTime))
        );
    }

    #[test]
    fn phase_takes_timestamp_from_other_fields() {
        let completion = classify(&json!({
            "status": {
                "phase": "Failed",
                "conditions": [
                    { "type": "Completed", "status": "True", "lastTransitionTime": "2024-03-01T07:15:00Z" }
                ]
            }
        }));
        assert_eq!(
            completion,
            Completion::Finished {
                signal: FinishSignal::Phase("Failed".to_string()),
                completed_at: Some(at(7, 15)),
            }
        );
    }

    #[test]
    fn non_finished_phase_still_checks_conditions() {
        let completion = classify(&json!({
            "status": {
                "phase": "Running",
                "conditions": [ { "type": "Succeeded", "status": "True" } ]
            }
        }));
        assert!(completion.is_finished());
    }

    #[test]
    fn non_finished_phase_still_checks_completion_time() {
        let completion = classify(&json!({
            "status": {
                "phase": "Running",
                "completionTime": "2024-03-01T10:00:00Z"
            }
        }));
        assert!(matches!(
            completion,
            Completion::Finished {
                signal: FinishSignal::CompletionTime,
                ..
            }
        ));
    }

    #[test]
    fn transition_time_of_unmatched_condition_is_ignored() {
        let object = json!({
            "status": {
                "phase": "Succeeded",
                "conditions": [
                    { "type": "Succeeded", "status": "False", "lastTransitionTime": "2024-03-01T07:15:00Z" }
                ]
            }
        });
        assert_eq!(completion_instant(&object), None);
    }
}
