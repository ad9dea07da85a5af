//! Events - 観測可能なドメインイベント
//!
//! 重要な状態遷移ごとに1件のイベントを EventSink に送ります。
//! 本番では TracingEventSink が構造化ログとして出力します。

use chrono::{DateTime, Utc};

use super::ids::ScheduleId;
use super::instance::ResourceKey;

/// Why a delete call was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTrigger {
    /// Already expired when a pass looked at it.
    Immediate,
    /// A deadline timer fired.
    Timer,
}

impl DeleteTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            DeleteTrigger::Immediate => "immediate",
            DeleteTrigger::Timer => "timer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReapEvent {
    ScheduleCreated {
        policy: String,
        key: ResourceKey,
        schedule_id: ScheduleId,
        expires_at: DateTime<Utc>,
    },
    ScheduleReplaced {
        policy: String,
        key: ResourceKey,
        schedule_id: ScheduleId,
        previous: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    ScheduleCancelled {
        policy: String,
        key: ResourceKey,
    },
    DeleteAttempted {
        policy: String,
        key: ResourceKey,
        trigger: DeleteTrigger,
    },
    DeleteSucceeded {
        policy: String,
        key: ResourceKey,
    },
    DeleteSkippedNotFound {
        policy: String,
        key: ResourceKey,
    },
    DeleteDenied {
        policy: String,
        key: ResourceKey,
        reason: String,
    },
    DeleteFailed {
        policy: String,
        key: ResourceKey,
        reason: String,
    },
    PolicyInvalid {
        policy: String,
        reason: String,
    },
}

impl ReapEvent {
    /// Stable event name, used as the `event` field in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ReapEvent::ScheduleCreated { .. } => "schedule-created",
            ReapEvent::ScheduleReplaced { .. } => "schedule-replaced",
            ReapEvent::ScheduleCancelled { .. } => "schedule-cancelled",
            ReapEvent::DeleteAttempted { .. } => "delete-attempted",
            ReapEvent::DeleteSucceeded { .. } => "delete-succeeded",
            ReapEvent::DeleteSkippedNotFound { .. } => "delete-skipped-not-found",
            ReapEvent::DeleteDenied { .. } => "delete-denied",
            ReapEvent::DeleteFailed { .. } => "delete-failed",
            ReapEvent::PolicyInvalid { .. } => "policy-invalid",
        }
    }

    pub fn policy(&self) -> &str {
        match self {
            ReapEvent::ScheduleCreated { policy, .. }
            | ReapEvent::ScheduleReplaced { policy, .. }
            | ReapEvent::ScheduleCancelled { policy, .. }
            | ReapEvent::DeleteAttempted { policy, .. }
            | ReapEvent::DeleteSucceeded { policy, .. }
            | ReapEvent::DeleteSkippedNotFound { policy, .. }
            | ReapEvent::DeleteDenied { policy, .. }
            | ReapEvent::DeleteFailed { policy, .. }
            | ReapEvent::PolicyInvalid { policy, .. } => policy,
        }
    }

    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            ReapEvent::ScheduleCreated { key, .. }
            | ReapEvent::ScheduleReplaced { key, .. }
            | ReapEvent::ScheduleCancelled { key, .. }
            | ReapEvent::DeleteAttempted { key, .. }
            | ReapEvent::DeleteSucceeded { key, .. }
            | ReapEvent::DeleteSkippedNotFound { key, .. }
            | ReapEvent::DeleteDenied { key, .. }
            | ReapEvent::DeleteFailed { key, .. } => Some(key),
            ReapEvent::PolicyInvalid { .. } => None,
        }
    }
}
