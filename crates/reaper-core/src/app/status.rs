//! Status - policy ごとの状態ボード
//!
//! pass の結果、timer 経由の削除、設定エラーをここに集約します。
//! CLI はこれを JSON で出力します。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::app::reconciler::ReconcileReport;
use crate::domain::PolicyPhase;

/// Observable state of one policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    pub name: String,
    pub phase: PolicyPhase,
    pub enabled: bool,
    pub last_processed_time: Option<DateTime<Utc>>,
    /// Instances examined by the last pass.
    pub processed_count: usize,
    /// Timers armed or kept by the last pass.
    pub scheduled_count: usize,
    /// Immediate deletes by the last pass.
    pub deleted_count: usize,
    /// Resources this controller deleted since the policy was first seen,
    /// timers included. Resources found already gone are not counted.
    pub total_reaped: u64,
    pub last_error: Option<String>,
    pub delete_denied: bool,
}

impl PolicyStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: PolicyPhase::Unvalidated,
            enabled: true,
            last_processed_time: None,
            processed_count: 0,
            scheduled_count: 0,
            deleted_count: 0,
            total_reaped: 0,
            last_error: None,
            delete_denied: false,
        }
    }
}

#[derive(Default)]
pub struct StatusBoard {
    policies: Mutex<BTreeMap<String, PolicyStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to `Unvalidated` after an edit. Counters are kept.
    pub async fn reset(&self, name: &str) {
        let mut policies = self.policies.lock().await;
        let status = policies
            .entry(name.to_string())
            .or_insert_with(|| PolicyStatus::new(name));
        status.phase = PolicyPhase::Unvalidated;
        status.last_error = None;
        status.delete_denied = false;
    }

    pub async fn record_pass(&self, report: &ReconcileReport, at: DateTime<Utc>) {
        let mut policies = self.policies.lock().await;
        let status = policies
            .entry(report.policy.clone())
            .or_insert_with(|| PolicyStatus::new(&report.policy));
        status.phase = PolicyPhase::Active;
        status.enabled = report.enabled;
        status.last_processed_time = Some(at);
        status.processed_count = report.processed;
        status.scheduled_count = report.scheduled;
        status.deleted_count = report.deleted;
        status.total_reaped += report.deleted as u64;
        status.delete_denied |= report.denied > 0;
        status.last_error = report.error_summary();
    }

    /// A pass that could not run. `phase` is `Failed` for config errors;
    /// transient failures leave the phase as it was.
    pub async fn record_error(&self, name: &str, error: String, phase: Option<PolicyPhase>) {
        let mut policies = self.policies.lock().await;
        let status = policies
            .entry(name.to_string())
            .or_insert_with(|| PolicyStatus::new(name));
        if let Some(phase) = phase {
            status.phase = phase;
        }
        status.last_error = Some(error);
    }

    /// A delete issued by a timer outside any pass.
    pub async fn record_reaped(&self, name: &str) {
        if let Some(status) = self.policies.lock().await.get_mut(name) {
            status.total_reaped += 1;
        }
    }

    pub async fn record_denied(&self, name: &str) {
        if let Some(status) = self.policies.lock().await.get_mut(name) {
            status.delete_denied = true;
        }
    }

    pub async fn remove(&self, name: &str) {
        self.policies.lock().await.remove(name);
    }

    pub async fn get(&self, name: &str) -> Option<PolicyStatus> {
        self.policies.lock().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> Vec<PolicyStatus> {
        self.policies.lock().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PassId;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn report(deleted: usize) -> ReconcileReport {
        ReconcileReport {
            deleted,
            processed: 3,
            ..ReconcileReport::new("runs", PassId::from(Ulid::nil()))
        }
    }

    #[tokio::test]
    async fn pass_accumulates_total_reaped() {
        let board = StatusBoard::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        board.record_pass(&report(2), t0).await;
        board.record_reaped("runs").await;
        board.record_pass(&report(1), t0).await;

        let status = board.get("runs").await.unwrap();
        assert_eq!(status.phase, PolicyPhase::Active);
        assert_eq!(status.deleted_count, 1);
        assert_eq!(status.total_reaped, 4);
        assert_eq!(status.last_processed_time, Some(t0));
    }

    #[tokio::test]
    async fn already_gone_is_not_reaped() {
        let board = StatusBoard::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let pass = ReconcileReport {
            already_gone: 2,
            ..report(1)
        };

        board.record_pass(&pass, t0).await;

        let status = board.get("runs").await.unwrap();
        assert_eq!(status.deleted_count, 1);
        assert_eq!(status.total_reaped, 1);
    }

    #[tokio::test]
    async fn config_error_marks_failed_until_reset() {
        let board = StatusBoard::new();

        board
            .record_error("runs", "targetKind is required".into(), Some(PolicyPhase::Failed))
            .await;
        assert_eq!(board.get("runs").await.unwrap().phase, PolicyPhase::Failed);

        board.reset("runs").await;
        let status = board.get("runs").await.unwrap();
        assert_eq!(status.phase, PolicyPhase::Unvalidated);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn status_serializes_camel_case() {
        let board = StatusBoard::new();
        board.reset("runs").await;

        let json = serde_json::to_value(board.snapshot().await).unwrap();

        assert_eq!(json[0]["phase"], "unvalidated");
        assert_eq!(json[0]["totalReaped"], 0);
        assert!(json[0]["lastProcessedTime"].is_null());
    }
}
