//! TargetLister - 対象 kind のスナップショット取得
//!
//! # エラーの扱い
//! - kind 未インストール / NotFound → 空の結果（エラーではない）
//! - それ以外 → Transient として呼び出し側へ
//! - cluster 全体スコープでは namespace ごとに一覧し、失敗を namespace 単位に閉じ込める

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{LabelSelector, NamespaceScope, ResourceLocator, TargetInstance};
use crate::ports::{ClusterClient, ClusterError};

/// Snapshot of one namespace, or the reason it could not be listed.
#[derive(Debug)]
pub struct NamespaceListing {
    pub namespace: String,
    pub result: Result<Vec<TargetInstance>, ClusterError>,
}

pub struct TargetLister {
    client: Arc<dyn ClusterClient>,
    timeout: Duration,
}

impl TargetLister {
    pub fn new(client: Arc<dyn ClusterClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Namespaces a pass must visit for a scope.
    pub async fn namespaces(&self, scope: &NamespaceScope) -> Result<Vec<String>, ClusterError> {
        match scope {
            NamespaceScope::Single(ns) => Ok(vec![ns.clone()]),
            NamespaceScope::All => {
                with_timeout(self.timeout, self.client.list_namespaces()).await
            }
        }
    }

    /// List one namespace. A missing resource type is an empty snapshot.
    pub async fn list(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<TargetInstance>, ClusterError> {
        let listed = with_timeout(
            self.timeout,
            self.client.list(locator, Some(namespace), selector),
        )
        .await;

        match listed {
            Ok(instances) => Ok(match selector {
                // Clients may ignore the selector; filter again.
                Some(selector) => instances
                    .into_iter()
                    .filter(|i| selector.matches(&i.labels))
                    .collect(),
                None => instances,
            }),
            Err(ClusterError::KindNotInstalled(_) | ClusterError::NotFound(_)) => {
                debug!(%locator, namespace, "resource type not installed, nothing to list");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    /// List every namespace in scope, one result per namespace.
    pub async fn list_scope(
        &self,
        locator: &ResourceLocator,
        namespaces: &[String],
        selector: Option<&LabelSelector>,
    ) -> Vec<NamespaceListing> {
        let mut listings = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            let result = self.list(locator, namespace, selector).await;
            listings.push(NamespaceListing {
                namespace: namespace.clone(),
                result,
            });
        }
        listings
    }
}

/// Bound a cluster call. Elapsed becomes `ClusterError::Timeout`.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ClusterError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::impls::InMemoryCluster;
    use serde_json::json;

    fn job_locator() -> ResourceLocator {
        ResourceLocator::new("batch", "v1", "jobs")
    }

    fn job(ns: &str, name: &str, team: &str) -> serde_json::Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": name, "namespace": ns, "labels": {"team": team}},
        })
    }

    async fn cluster() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.install(job_locator()).await;
        cluster.add_namespace("a").await;
        cluster.add_namespace("b").await;
        cluster.put(job("a", "j1", "ci")).await.unwrap();
        cluster.put(job("a", "j2", "data")).await.unwrap();
        cluster.put(job("b", "j3", "ci")).await.unwrap();
        cluster
    }

    #[tokio::test]
    async fn single_namespace_scope_does_not_enumerate() {
        let cluster = cluster().await;
        cluster.fail_namespace_listing().await;
        let lister = TargetLister::new(cluster, Duration::from_secs(5));

        let namespaces = lister
            .namespaces(&NamespaceScope::Single("a".into()))
            .await
            .unwrap();

        assert_eq!(namespaces, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn selector_filters_instances() {
        let lister = TargetLister::new(cluster().await, Duration::from_secs(5));
        let selector = LabelSelector {
            match_labels: [("team".to_string(), "ci".to_string())].into(),
        };

        let listed = lister
            .list(&job_locator(), "a", Some(&selector))
            .await
            .unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "j1");
    }

    #[tokio::test]
    async fn missing_kind_is_empty_not_error() {
        let lister = TargetLister::new(cluster().await, Duration::from_secs(5));
        let locator = ResourceLocator::new("tekton.dev", "v1beta1", "pipelineruns");

        let listed = lister.list(&locator, "a", None).await.unwrap();

        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn failure_is_isolated_per_namespace() {
        let cluster = cluster().await;
        cluster.fail_listing_in("a").await;
        let lister = TargetLister::new(cluster, Duration::from_secs(5));

        let namespaces = lister.namespaces(&NamespaceScope::All).await.unwrap();
        let listings = lister.list_scope(&job_locator(), &namespaces, None).await;

        let a = listings.iter().find(|l| l.namespace == "a").unwrap();
        let b = listings.iter().find(|l| l.namespace == "b").unwrap();
        assert!(a.result.is_err());
        assert_eq!(b.result.as_ref().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_as_transient() {
        let cluster = cluster().await;
        cluster.set_latency(Duration::from_secs(60)).await;
        let lister = TargetLister::new(cluster, Duration::from_secs(5));

        let err = lister.list(&job_locator(), "a", None).await.unwrap_err();

        assert_eq!(err, ClusterError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
