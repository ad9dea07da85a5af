//! ControllerBuilder - コントローラの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 差し替え可能な port（Clock, EventSink, IdGenerator）にはデフォルトを用意

use std::sync::Arc;

use crate::app::controller::{Controller, ControllerSettings};
use crate::app::deleter::DeletionExecutor;
use crate::app::lister::TargetLister;
use crate::app::reconciler::PolicyReconciler;
use crate::app::scheduler::ExpirationScheduler;
use crate::app::status::StatusBoard;
use crate::app::watch_registry::WatchRegistry;
use crate::config::{ConfigFileError, ReaperConfig};
use crate::impls::TracingEventSink;
use crate::ports::{ClusterClient, Clock, EventSink, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::WorkQueue;

/// ControllerBuilder はコントローラを構築
///
/// # 使用例
/// ```ignore
/// let controller = ControllerBuilder::new(config)
///     .client(cluster)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - ClusterClient がなければ BuildError::MissingClient
/// - 設定値の検証に失敗したら BuildError::InvalidConfig
pub struct ControllerBuilder {
    config: ReaperConfig,
    client: Option<Arc<dyn ClusterClient>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はコントローラ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no cluster client configured; call .client() before .build()")]
    MissingClient,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigFileError),
}

impl ControllerBuilder {
    pub fn new(config: ReaperConfig) -> Self {
        Self {
            config,
            client: None,
            clock: None,
            events: None,
            ids: None,
        }
    }

    pub fn client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to [`TracingEventSink`].
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Defaults to ULIDs stamped with the configured clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Arc<Controller>, BuildError> {
        let client = self.client.ok_or(BuildError::MissingClient)?;
        self.config.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events: Arc<dyn EventSink> = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let resolver = Arc::new(self.config.resolver());
        let timeout = self.config.client_timeout();

        let status = Arc::new(StatusBoard::new());
        let executor = Arc::new(DeletionExecutor::new(
            Arc::clone(&client),
            Arc::clone(&events),
            timeout,
        ));
        let scheduler = ExpirationScheduler::new(
            executor,
            Arc::clone(&status),
            Arc::clone(&clock),
            Arc::clone(&ids),
            Arc::clone(&events),
        );
        let reconciler = PolicyReconciler::new(
            Arc::clone(&resolver),
            TargetLister::new(Arc::clone(&client), timeout),
            scheduler,
            ids,
            events,
        );
        let (registry, triggers) = WatchRegistry::new(client, resolver, timeout);
        let queue = Arc::new(WorkQueue::new(self.config.retry_policy()));

        Ok(Arc::new(Controller::new(
            reconciler,
            registry,
            triggers,
            queue,
            status,
            clock,
            ControllerSettings {
                workers: self.config.workers,
                watch_refresh_interval: self.config.watch_refresh_interval(),
            },
        )))
    }
}
