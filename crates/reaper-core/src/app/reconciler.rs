//! PolicyReconciler - policy 1件分の pass
//!
//! # フロー
//! 1. policy を検証して ResourceLocator を解決（失敗 → ConfigError、policy は Failed）
//! 2. スコープ内の namespace を列挙（失敗 → pass 全体が Transient）
//! 3. namespace ごとに一覧 → 分類 → スケジュール（失敗は namespace 単位で閉じ込める）
//! 4. もう期限対象でなくなった key のタイマーを止める

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app::deleter::DeleteOutcome;
use crate::app::lister::TargetLister;
use crate::app::scheduler::{Evaluation, ExpirationScheduler, ScheduleOutcome, evaluate};
use crate::domain::{
    ConfigError, ErrorKind, LocatorResolver, PassId, ReapEvent, ReaperPolicy, ResourceKey,
    TargetInstance, ValidatedPolicy,
};
use crate::ports::{ClusterError, EventSink, IdGenerator};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("invalid policy: {0}")]
    Config(#[from] ConfigError),

    #[error("listing namespaces failed: {0}")]
    Namespaces(#[source] ClusterError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Config(err) => err.kind(),
            ReconcileError::Namespaces(err) => err.kind(),
        }
    }
}

/// What one pass saw and did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub policy: String,
    pub pass_id: PassId,
    pub enabled: bool,
    /// Instances examined.
    pub processed: usize,
    /// Timers armed, replaced or kept.
    pub scheduled: usize,
    /// Deleted synchronously by this pass.
    pub deleted: usize,
    /// Expired but already gone when the delete was issued.
    pub already_gone: usize,
    pub invalid_ttl: usize,
    pub denied: usize,
    /// Deletes that failed transiently; retried on the next pass.
    pub failed_deletes: usize,
    pub cancelled: usize,
    /// Namespaces that could not be listed, with the reason.
    pub failed_namespaces: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn new(policy: impl Into<String>, pass_id: PassId) -> Self {
        Self {
            policy: policy.into(),
            pass_id,
            enabled: true,
            processed: 0,
            scheduled: 0,
            deleted: 0,
            already_gone: 0,
            invalid_ttl: 0,
            denied: 0,
            failed_deletes: 0,
            cancelled: 0,
            failed_namespaces: Vec::new(),
        }
    }

    /// Partial failures worth surfacing, if any.
    pub fn error_summary(&self) -> Option<String> {
        if self.failed_namespaces.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .failed_namespaces
            .iter()
            .map(|(ns, reason)| format!("{ns}: {reason}"))
            .collect();
        Some(format!("listing failed in {}", parts.join("; ")))
    }

    fn record(&mut self, outcome: &ScheduleOutcome) {
        match outcome {
            ScheduleOutcome::Immediate(delete) => match delete {
                DeleteOutcome::Deleted => self.deleted += 1,
                DeleteOutcome::AlreadyGone => self.already_gone += 1,
                DeleteOutcome::Denied(_) => self.denied += 1,
                DeleteOutcome::Transient(_) => self.failed_deletes += 1,
            },
            ScheduleOutcome::Armed { .. }
            | ScheduleOutcome::Replaced { .. }
            | ScheduleOutcome::Unchanged { .. } => self.scheduled += 1,
            ScheduleOutcome::Suppressed => self.denied += 1,
        }
    }
}

pub struct PolicyReconciler {
    resolver: Arc<LocatorResolver>,
    lister: TargetLister,
    scheduler: ExpirationScheduler,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
}

impl PolicyReconciler {
    pub fn new(
        resolver: Arc<LocatorResolver>,
        lister: TargetLister,
        scheduler: ExpirationScheduler,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            resolver,
            lister,
            scheduler,
            ids,
            events,
        }
    }

    pub fn resolver(&self) -> &LocatorResolver {
        &self.resolver
    }

    pub fn scheduler(&self) -> &ExpirationScheduler {
        &self.scheduler
    }

    /// Run one pass over a policy.
    pub async fn reconcile(&self, policy: &ReaperPolicy) -> Result<ReconcileReport, ReconcileError> {
        let pass_id = self.ids.generate_pass_id();
        let mut report = ReconcileReport::new(&policy.name, pass_id);

        let validated = match policy.validate(&self.resolver) {
            Ok(validated) => validated,
            Err(err) => {
                self.events.emit(ReapEvent::PolicyInvalid {
                    policy: policy.name.clone(),
                    reason: err.to_string(),
                });
                self.scheduler.cancel_policy(&policy.name).await;
                return Err(err.into());
            }
        };

        if !validated.enabled {
            report.enabled = false;
            report.cancelled = self.scheduler.cancel_policy(&validated.name).await;
            debug!(policy = %validated.name, %pass_id, "policy disabled, skipping pass");
            return Ok(report);
        }

        let namespaces = self
            .lister
            .namespaces(&validated.scope)
            .await
            .map_err(ReconcileError::Namespaces)?;

        let listings = self
            .lister
            .list_scope(&validated.locator, &namespaces, validated.selector.as_ref())
            .await;

        for listing in listings {
            match listing.result {
                Ok(instances) => {
                    let live = self
                        .process_namespace(&validated, &instances, &mut report)
                        .await;
                    report.cancelled += self
                        .scheduler
                        .cancel_stale(&validated.name, &listing.namespace, &live)
                        .await;
                }
                Err(err) => {
                    warn!(
                        policy = %validated.name,
                        %pass_id,
                        namespace = %listing.namespace,
                        error = %err,
                        "listing failed, namespace skipped for this pass"
                    );
                    report
                        .failed_namespaces
                        .push((listing.namespace, err.to_string()));
                }
            }
        }

        info!(
            policy = %validated.name,
            %pass_id,
            processed = report.processed,
            scheduled = report.scheduled,
            deleted = report.deleted,
            failed_namespaces = report.failed_namespaces.len(),
            "pass complete"
        );
        Ok(report)
    }

    /// Returns the keys that still have a live timer after the namespace is processed.
    async fn process_namespace(
        &self,
        policy: &ValidatedPolicy,
        instances: &[TargetInstance],
        report: &mut ReconcileReport,
    ) -> HashSet<ResourceKey> {
        let mut live = HashSet::new();
        for instance in instances {
            report.processed += 1;
            let key = instance.key();
            match evaluate(instance, &policy.ttl_path) {
                Evaluation::Expiring {
                    expires_at, source, ..
                } => {
                    debug!(policy = %policy.name, %key, %expires_at, ?source, "expiring");
                    let outcome = self
                        .scheduler
                        .schedule(&policy.name, &policy.locator, &key, expires_at)
                        .await;
                    report.record(&outcome);
                    if outcome.is_pending() {
                        live.insert(key);
                    }
                }
                Evaluation::InvalidTtl(err) => {
                    report.invalid_ttl += 1;
                    warn!(policy = %policy.name, %key, error = %err, "invalid TTL value, skipping");
                }
                Evaluation::NoCompletionInstant => {
                    warn!(policy = %policy.name, %key, "finished but no completion or creation time, skipping");
                }
                Evaluation::NeverExpires => {
                    debug!(policy = %policy.name, %key, "expiration beyond representable time, skipping");
                }
                Evaluation::Unfinished | Evaluation::NoTtl => {}
            }
        }
        live
    }
}
