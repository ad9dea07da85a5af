//! EventSink implementations.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::domain::ReapEvent;
use crate::ports::EventSink;

/// One structured log record per event, with an `event` field naming it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ReapEvent) {
        let name = event.name();
        match &event {
            ReapEvent::ScheduleCreated {
                policy,
                key,
                schedule_id,
                expires_at,
            } => info!(event = name, %policy, %key, %schedule_id, %expires_at, "deletion scheduled"),
            ReapEvent::ScheduleReplaced {
                policy,
                key,
                schedule_id,
                previous,
                expires_at,
            } => info!(
                event = name,
                %policy,
                %key,
                %schedule_id,
                %previous,
                %expires_at,
                "deletion rescheduled"
            ),
            ReapEvent::ScheduleCancelled { policy, key } => {
                info!(event = name, %policy, %key, "scheduled deletion cancelled")
            }
            ReapEvent::DeleteAttempted {
                policy,
                key,
                trigger,
            } => info!(event = name, %policy, %key, trigger = trigger.as_str(), "deleting"),
            ReapEvent::DeleteSucceeded { policy, key } => {
                info!(event = name, %policy, %key, "deleted")
            }
            ReapEvent::DeleteSkippedNotFound { policy, key } => {
                info!(event = name, %policy, %key, "already deleted")
            }
            ReapEvent::DeleteDenied {
                policy,
                key,
                reason,
            } => warn!(event = name, %policy, %key, %reason, "delete denied"),
            ReapEvent::DeleteFailed {
                policy,
                key,
                reason,
            } => warn!(event = name, %policy, %key, %reason, "delete failed, will retry on next pass"),
            ReapEvent::PolicyInvalid { policy, reason } => {
                warn!(event = name, %policy, %reason, "policy invalid")
            }
        }
    }
}

/// Keeps every event in memory, for tests and the CLI's `--once` summary.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ReapEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReapEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ReapEvent::name)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ReapEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Sends every event to each inner sink.
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: ReapEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
