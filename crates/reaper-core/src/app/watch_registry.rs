//! WatchRegistry - locator ごとに1本の change watch
//!
//! # 方針
//! - refresh() のたびに policy が参照する locator の集合を計算し、新しいものだけ watch を開く
//! - 開いた watch は policy が消えても閉じない
//! - stream が終わった locator は集合から外し、次の refresh で開き直す
//! - refresh は直列化する（feed と ticker が同時に呼んでも watch は locator ごとに1本）
//! - add / update イベントは locator を trigger チャネルへ流すだけ（どの policy を起こすかは呼び出し側）

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::lister::with_timeout;
use crate::domain::{LocatorResolver, ReaperPolicy, ResourceLocator};
use crate::ports::{ClusterClient, WatchStream};

pub type TriggerSender = mpsc::UnboundedSender<ResourceLocator>;
pub type TriggerReceiver = mpsc::UnboundedReceiver<ResourceLocator>;

/// A live forwarder. `generation` tells an ended forwarder whether the entry is still its own.
struct WatchEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

type WatchTable = Arc<Mutex<HashMap<ResourceLocator, WatchEntry>>>;

pub struct WatchRegistry {
    client: Arc<dyn ClusterClient>,
    resolver: Arc<LocatorResolver>,
    timeout: Duration,
    watched: WatchTable,
    refreshing: Mutex<()>,
    generations: AtomicU64,
    triggers: TriggerSender,
}

impl WatchRegistry {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        resolver: Arc<LocatorResolver>,
        timeout: Duration,
    ) -> (Self, TriggerReceiver) {
        let (triggers, rx) = mpsc::unbounded_channel();
        let registry = Self {
            client,
            resolver,
            timeout,
            watched: Arc::new(Mutex::new(HashMap::new())),
            refreshing: Mutex::new(()),
            generations: AtomicU64::new(0),
            triggers,
        };
        (registry, rx)
    }

    /// Open a watch for every locator referenced by `policies` that is not
    /// yet watched. Invalid policies are ignored. Returns how many were opened.
    pub async fn refresh<'a>(&self, policies: impl IntoIterator<Item = &'a ReaperPolicy>) -> usize {
        let mut wanted: Vec<ResourceLocator> = policies
            .into_iter()
            .filter_map(|policy| policy.validate(&self.resolver).ok())
            .filter(|policy| policy.enabled)
            .map(|policy| policy.locator)
            .collect();
        wanted.sort();
        wanted.dedup();

        // Held across the watch calls so two refreshes never open the same locator.
        let _refreshing = self.refreshing.lock().await;
        let mut opened = 0;
        for locator in wanted {
            if self.watched.lock().await.contains_key(&locator) {
                continue;
            }
            match with_timeout(self.timeout, self.client.watch(&locator, None)).await {
                Ok(stream) => {
                    // Insert under the lock so a stream that ends at once cannot race the removal.
                    let mut watched = self.watched.lock().await;
                    let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                    let handle = self.spawn_forwarder(locator.clone(), generation, stream);
                    if let Some(replaced) =
                        watched.insert(locator.clone(), WatchEntry { generation, handle })
                    {
                        replaced.handle.abort();
                    }
                    drop(watched);
                    info!(%locator, "watch established");
                    opened += 1;
                }
                Err(err) => {
                    warn!(%locator, error = %err, "opening watch failed, will retry on next refresh");
                }
            }
        }
        opened
    }

    fn spawn_forwarder(
        &self,
        locator: ResourceLocator,
        generation: u64,
        mut stream: WatchStream,
    ) -> JoinHandle<()> {
        let triggers = self.triggers.clone();
        let watched = Arc::clone(&self.watched);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if !event.is_relevant() {
                    continue;
                }
                debug!(%locator, key = %event.instance().key(), "watch event");
                if triggers.send(locator.clone()).is_err() {
                    return;
                }
            }
            warn!(%locator, "watch stream ended, will re-establish on next refresh");
            let mut watched = watched.lock().await;
            if watched
                .get(&locator)
                .is_some_and(|entry| entry.generation == generation)
            {
                watched.remove(&locator);
            }
        })
    }

    pub async fn is_watching(&self, locator: &ResourceLocator) -> bool {
        self.watched.lock().await.contains_key(locator)
    }

    pub async fn watched_count(&self) -> usize {
        self.watched.lock().await.len()
    }

    /// Stop every forwarder.
    pub async fn shutdown(&self) {
        let mut watched = self.watched.lock().await;
        for (_, entry) in watched.drain() {
            entry.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryCluster;
    use serde_json::json;

    fn jobs() -> ResourceLocator {
        ResourceLocator::new("batch", "v1", "jobs")
    }

    async fn setup() -> (Arc<InMemoryCluster>, WatchRegistry, TriggerReceiver) {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.install(jobs()).await;
        cluster.add_namespace("batch").await;
        let (registry, rx) = WatchRegistry::new(
            cluster.clone(),
            Arc::new(LocatorResolver::default()),
            Duration::from_secs(5),
        );
        (cluster, registry, rx)
    }

    #[tokio::test]
    async fn one_watch_per_distinct_locator() {
        let (cluster, registry, _rx) = setup().await;
        let policies = vec![
            ReaperPolicy::new("a", "Job", "batch/v1"),
            ReaperPolicy::new("b", "Job", "batch/v1").in_namespace("batch"),
            ReaperPolicy::new("broken", "", "batch/v1"),
        ];

        assert_eq!(registry.refresh(&policies).await, 1);
        assert_eq!(registry.refresh(&policies).await, 0);
        assert_eq!(registry.watched_count().await, 1);
        assert_eq!(cluster.watch_count(&jobs()).await, 1);
    }

    #[tokio::test]
    async fn add_and_update_events_trigger_locator() {
        let (cluster, registry, mut rx) = setup().await;
        registry
            .refresh(&[ReaperPolicy::new("a", "Job", "batch/v1")])
            .await;

        cluster
            .put(json!({
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": {"name": "j1", "namespace": "batch"},
            }))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(jobs()));
    }

    #[tokio::test]
    async fn ended_stream_is_reopened_on_refresh() {
        let (cluster, registry, _rx) = setup().await;
        let policies = [ReaperPolicy::new("a", "Job", "batch/v1")];
        registry.refresh(&policies).await;

        cluster.close_watches().await;
        for _ in 0..10 {
            if !registry.is_watching(&jobs()).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_watching(&jobs()).await);

        assert_eq!(registry.refresh(&policies).await, 1);
        assert!(registry.is_watching(&jobs()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_open_one_watch() {
        let (cluster, registry, _rx) = setup().await;
        cluster.set_latency(Duration::from_millis(10)).await;
        let policies = [ReaperPolicy::new("a", "Job", "batch/v1")];

        let (a, b) = tokio::join!(registry.refresh(&policies), registry.refresh(&policies));

        assert_eq!(a + b, 1);
        assert_eq!(registry.watched_count().await, 1);
        assert_eq!(cluster.watch_count(&jobs()).await, 1);
    }

    #[tokio::test]
    async fn disabled_policies_open_no_watch() {
        let (_cluster, registry, _rx) = setup().await;

        let opened = registry
            .refresh(&[ReaperPolicy::new("a", "Job", "batch/v1").disabled()])
            .await;

        assert_eq!(opened, 0);
    }
}
