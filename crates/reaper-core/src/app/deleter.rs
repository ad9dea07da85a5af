//! DeletionExecutor - 削除の実行と結果の分類
//!
//! # 結果
//! - Deleted: 削除成功
//! - AlreadyGone: 既に存在しない（成功扱い）
//! - Denied: 権限なし（自動リトライしない）
//! - Transient: それ以外（タイムアウト含む）。次の pass で拾い直す
//!
//! 1回の呼び出しで1回だけ削除を試みます。ループでのリトライはしません。

use std::sync::Arc;
use std::time::Duration;

use crate::app::lister::with_timeout;
use crate::domain::{DeleteTrigger, ReapEvent, ResourceKey, ResourceLocator};
use crate::ports::{ClusterClient, ClusterError, EventSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
    Denied(String),
    Transient(String),
}

impl DeleteOutcome {
    /// Deleted and AlreadyGone both mean the resource no longer exists.
    pub fn is_success(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted | DeleteOutcome::AlreadyGone)
    }

    fn from_result(result: Result<(), ClusterError>) -> Self {
        match result {
            Ok(()) => DeleteOutcome::Deleted,
            Err(ClusterError::NotFound(_)) => DeleteOutcome::AlreadyGone,
            Err(ClusterError::Forbidden(reason)) => DeleteOutcome::Denied(reason),
            Err(err) => DeleteOutcome::Transient(err.to_string()),
        }
    }
}

pub struct DeletionExecutor {
    client: Arc<dyn ClusterClient>,
    events: Arc<dyn EventSink>,
    timeout: Duration,
}

impl DeletionExecutor {
    pub fn new(client: Arc<dyn ClusterClient>, events: Arc<dyn EventSink>, timeout: Duration) -> Self {
        Self {
            client,
            events,
            timeout,
        }
    }

    pub async fn delete(
        &self,
        policy: &str,
        locator: &ResourceLocator,
        key: &ResourceKey,
        trigger: DeleteTrigger,
    ) -> DeleteOutcome {
        self.events.emit(ReapEvent::DeleteAttempted {
            policy: policy.to_string(),
            key: key.clone(),
            trigger,
        });

        let result = with_timeout(
            self.timeout,
            self.client.delete(locator, &key.namespace, &key.name),
        )
        .await;
        let outcome = DeleteOutcome::from_result(result);

        let policy = policy.to_string();
        let key = key.clone();
        self.events.emit(match &outcome {
            DeleteOutcome::Deleted => ReapEvent::DeleteSucceeded { policy, key },
            DeleteOutcome::AlreadyGone => ReapEvent::DeleteSkippedNotFound { policy, key },
            DeleteOutcome::Denied(reason) => ReapEvent::DeleteDenied {
                policy,
                key,
                reason: reason.clone(),
            },
            DeleteOutcome::Transient(reason) => ReapEvent::DeleteFailed {
                policy,
                key,
                reason: reason.clone(),
            },
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryCluster, RecordingEventSink};
    use serde_json::json;

    fn locator() -> ResourceLocator {
        ResourceLocator::new("batch", "v1", "jobs")
    }

    async fn setup() -> (Arc<InMemoryCluster>, Arc<RecordingEventSink>, DeletionExecutor) {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.install(locator()).await;
        cluster.add_namespace("batch").await;
        cluster
            .put(json!({
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": {"name": "j1", "namespace": "batch"},
            }))
            .await
            .unwrap();
        let events = Arc::new(RecordingEventSink::new());
        let executor = DeletionExecutor::new(
            cluster.clone(),
            events.clone(),
            Duration::from_secs(5),
        );
        (cluster, events, executor)
    }

    #[tokio::test]
    async fn deletes_existing_resource() {
        let (cluster, events, executor) = setup().await;
        let key = ResourceKey::new("batch", "Job", "j1");

        let outcome = executor
            .delete("jobs", &locator(), &key, DeleteTrigger::Immediate)
            .await;

        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(!cluster.contains(&locator(), "batch", "j1").await);
        assert_eq!(events.names(), vec!["delete-attempted", "delete-succeeded"]);
    }

    #[tokio::test]
    async fn deleting_twice_is_success() {
        let (_cluster, events, executor) = setup().await;
        let key = ResourceKey::new("batch", "Job", "j1");

        executor
            .delete("jobs", &locator(), &key, DeleteTrigger::Timer)
            .await;
        let second = executor
            .delete("jobs", &locator(), &key, DeleteTrigger::Timer)
            .await;

        assert_eq!(second, DeleteOutcome::AlreadyGone);
        assert!(second.is_success());
        assert_eq!(events.names().last(), Some(&"delete-skipped-not-found"));
    }

    #[tokio::test]
    async fn forbidden_is_denied_not_transient() {
        let (cluster, events, executor) = setup().await;
        cluster.deny_deletes_in("batch").await;
        let key = ResourceKey::new("batch", "Job", "j1");

        let outcome = executor
            .delete("jobs", &locator(), &key, DeleteTrigger::Immediate)
            .await;

        assert!(matches!(outcome, DeleteOutcome::Denied(_)));
        assert!(cluster.contains(&locator(), "batch", "j1").await);
        assert_eq!(events.names().last(), Some(&"delete-denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_transient() {
        let (cluster, _events, executor) = setup().await;
        cluster.set_latency(Duration::from_secs(60)).await;
        let key = ResourceKey::new("batch", "Job", "j1");

        let outcome = executor
            .delete("jobs", &locator(), &key, DeleteTrigger::Immediate)
            .await;

        assert!(matches!(outcome, DeleteOutcome::Transient(_)));
    }
}
