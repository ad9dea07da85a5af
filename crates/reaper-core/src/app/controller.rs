//! Controller - policy reconciliation loop
//!
//! # trigger
//! - policy の作成・更新（feed）
//! - watch イベント（同じ locator を対象にする全 policy）
//! - checkInterval ごとの定期実行（成功した pass の後に add_after）
//!
//! # 状態遷移
//! - Unvalidated -> Active: pass が成功
//! - Unvalidated -> Failed: ConfigError（編集されるまで再キューしない）
//! - namespace 列挙の失敗: 状態は変えず、バックオフ付きで再キュー

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::app::reconciler::{PolicyReconciler, ReconcileError, ReconcileReport};
use crate::app::status::{PolicyStatus, StatusBoard};
use crate::app::watch_registry::{TriggerReceiver, WatchRegistry};
use crate::app::worker_loop::{KeyHandler, WorkerGroup};
use crate::domain::{PolicyPhase, ReaperPolicy, ResourceLocator};
use crate::ports::{Clock, PolicyEvent, PolicyFeed};
use crate::queue::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub workers: usize,
    pub watch_refresh_interval: Duration,
}

pub struct Controller {
    policies: RwLock<BTreeMap<String, ReaperPolicy>>,
    reconciler: PolicyReconciler,
    registry: WatchRegistry,
    triggers: Mutex<Option<TriggerReceiver>>,
    queue: Arc<WorkQueue>,
    status: Arc<StatusBoard>,
    clock: Arc<dyn Clock>,
    settings: ControllerSettings,
}

impl Controller {
    pub(crate) fn new(
        reconciler: PolicyReconciler,
        registry: WatchRegistry,
        triggers: TriggerReceiver,
        queue: Arc<WorkQueue>,
        status: Arc<StatusBoard>,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            policies: RwLock::new(BTreeMap::new()),
            reconciler,
            registry,
            triggers: Mutex::new(Some(triggers)),
            queue,
            status,
            clock,
            settings,
        }
    }

    /// Apply one notification from the policy store.
    pub async fn apply(&self, event: PolicyEvent) {
        match event {
            PolicyEvent::Upserted(policy) => {
                let name = policy.name.clone();
                let previous = self
                    .policies
                    .write()
                    .await
                    .insert(name.clone(), policy.clone());

                let edited = previous.as_ref().is_none_or(|p| p.spec != policy.spec);
                if edited {
                    debug!(policy = %name, "policy created or edited");
                    self.status.reset(&name).await;
                    self.reconciler.scheduler().clear_denied(&name).await;
                    self.queue.forget(&name).await;
                }
                self.queue.add(name).await;
                self.refresh_watches().await;
            }
            PolicyEvent::Deleted(name) => {
                self.policies.write().await.remove(&name);
                let cancelled = self.reconciler.scheduler().cancel_policy(&name).await;
                self.status.remove(&name).await;
                self.queue.cancel_delayed(&name).await;
                self.queue.forget(&name).await;
                info!(policy = %name, cancelled, "policy deleted");
            }
        }
    }

    /// Queue every policy whose target resolves to `locator`.
    pub async fn trigger(&self, locator: &ResourceLocator) -> usize {
        let matching: Vec<String> = self
            .policies
            .read()
            .await
            .values()
            .filter(|policy| {
                policy
                    .validate(self.reconciler.resolver())
                    .is_ok_and(|v| &v.locator == locator)
            })
            .map(|policy| policy.name.clone())
            .collect();
        for name in &matching {
            self.queue.add(name.clone()).await;
        }
        matching.len()
    }

    pub async fn refresh_watches(&self) -> usize {
        let policies: Vec<ReaperPolicy> = self.policies.read().await.values().cloned().collect();
        self.registry.refresh(&policies).await
    }

    /// Run a pass for a policy right now, outside the worker pool.
    ///
    /// Returns `None` if the policy is unknown.
    pub async fn reconcile_now(&self, name: &str) -> Option<Result<ReconcileReport, ReconcileError>> {
        self.process(name).await
    }

    async fn process(&self, name: &str) -> Option<Result<ReconcileReport, ReconcileError>> {
        let policy = self.policies.read().await.get(name).cloned()?;
        let result = self.reconciler.reconcile(&policy).await;

        // Deleted while the pass ran: drop whatever the pass armed.
        if !self.policies.read().await.contains_key(name) {
            self.reconciler.scheduler().cancel_policy(name).await;
            return Some(result);
        }

        match &result {
            Ok(report) => {
                self.status.record_pass(report, self.clock.now()).await;
                self.queue.forget(name).await;
                self.queue.add_after(name, policy.check_interval()).await;
            }
            Err(err @ ReconcileError::Config(_)) => {
                warn!(policy = %name, error = %err, "policy failed validation");
                self.status
                    .record_error(name, err.to_string(), Some(PolicyPhase::Failed))
                    .await;
            }
            Err(err) => {
                self.status.record_error(name, err.to_string(), None).await;
                let delay = self.queue.add_rate_limited(name).await;
                warn!(policy = %name, error = %err, ?delay, "pass failed, retrying with backoff");
            }
        }
        Some(result)
    }

    pub async fn status(&self) -> Vec<PolicyStatus> {
        self.status.snapshot().await
    }

    pub async fn policy_status(&self, name: &str) -> Option<PolicyStatus> {
        self.status.get(name).await
    }

    pub async fn pending_timers(&self) -> usize {
        self.reconciler.scheduler().pending_count().await
    }

    /// Run until `shutdown` resolves: consume the feed, forward watch
    /// triggers, refresh watches periodically and drive the worker pool.
    pub async fn run(self: Arc<Self>, mut feed: PolicyFeed, shutdown: impl Future<Output = ()>) {
        info!(
            workers = self.settings.workers,
            refresh_secs = self.settings.watch_refresh_interval.as_secs(),
            "controller starting"
        );
        let workers = WorkerGroup::spawn(
            self.settings.workers,
            Arc::clone(&self.queue),
            Arc::clone(&self) as Arc<dyn KeyHandler>,
        );

        let feed_task = {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(event) = feed.recv().await {
                    controller.apply(event).await;
                }
                debug!("policy feed closed");
            })
        };

        let trigger_task = self.triggers.lock().await.take().map(|mut triggers| {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(locator) = triggers.recv().await {
                    let queued = controller.trigger(&locator).await;
                    debug!(%locator, queued, "watch trigger");
                }
            })
        });

        let refresh_task = {
            let controller = Arc::clone(&self);
            let period = self.settings.watch_refresh_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    controller.refresh_watches().await;
                }
            })
        };

        shutdown.await;
        info!("controller shutting down");

        feed_task.abort();
        refresh_task.abort();
        if let Some(task) = trigger_task {
            task.abort();
        }
        self.queue.shutdown().await;
        workers.shutdown_and_join().await;
        self.registry.shutdown().await;
        self.reconciler.scheduler().shutdown().await;
    }
}

#[async_trait]
impl KeyHandler for Controller {
    async fn handle(&self, key: &str) {
        self.process(key).await;
    }
}
