//! InMemoryCluster - 開発用・テスト用の ClusterClient
//!
//! # 特徴
//! - tokio::sync::Mutex で状態を保護
//! - watch は futures の unbounded channel を stream として返す
//! - 障害注入: namespace 単位の一覧失敗、namespace 列挙の失敗、削除拒否、遅延
//!
//! # 制約
//! - resourceVersion も bookmark もない。watch は接続後の変更だけを流す

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{
    InstanceError, LabelSelector, LocatorError, LocatorResolver, ResourceKey, ResourceLocator,
    TargetInstance,
};
use crate::ports::{ClusterClient, ClusterError, WatchEvent, WatchStream};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PutError {
    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Locator(#[from] LocatorError),
}

type ObjectKey = (String, String);

#[derive(Default)]
struct ClusterState {
    installed: HashSet<ResourceLocator>,
    namespaces: BTreeSet<String>,
    objects: HashMap<ResourceLocator, BTreeMap<ObjectKey, TargetInstance>>,
    watchers: HashMap<ResourceLocator, Vec<mpsc::UnboundedSender<WatchEvent>>>,
    failing_namespaces: HashSet<String>,
    namespace_listing_fails: bool,
    denied_namespaces: HashSet<String>,
    latency: Duration,
    deleted: Vec<ResourceKey>,
}

impl ClusterState {
    fn notify(&mut self, locator: &ResourceLocator, event: WatchEvent) {
        if let Some(senders) = self.watchers.get_mut(locator) {
            senders.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
        }
    }
}

/// A cluster held entirely in memory.
pub struct InMemoryCluster {
    resolver: LocatorResolver,
    state: Mutex<ClusterState>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::with_resolver(LocatorResolver::default())
    }

    /// Objects passed to `put` are filed under the locator this resolver gives.
    pub fn with_resolver(resolver: LocatorResolver) -> Self {
        Self {
            resolver,
            state: Mutex::new(ClusterState::default()),
        }
    }

    /// Register a resource type with no instances.
    pub async fn install(&self, locator: ResourceLocator) {
        self.state.lock().await.installed.insert(locator);
    }

    pub async fn add_namespace(&self, namespace: impl Into<String>) {
        self.state.lock().await.namespaces.insert(namespace.into());
    }

    /// Create or replace an object. Its type is installed if needed.
    pub async fn put(&self, object: Value) -> Result<ResourceLocator, PutError> {
        let instance = TargetInstance::from_object(object)?;
        let locator = self.resolver.resolve(&instance.kind, &instance.api_version)?;

        let mut state = self.state.lock().await;
        state.installed.insert(locator.clone());
        if !instance.namespace.is_empty() {
            state.namespaces.insert(instance.namespace.clone());
        }
        let previous = state
            .objects
            .entry(locator.clone())
            .or_default()
            .insert(
                (instance.namespace.clone(), instance.name.clone()),
                instance.clone(),
            );
        let event = match previous {
            Some(_) => WatchEvent::Modified(instance),
            None => WatchEvent::Added(instance),
        };
        state.notify(&locator, event);
        Ok(locator)
    }

    pub async fn contains(&self, locator: &ResourceLocator, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .await
            .objects
            .get(locator)
            .is_some_and(|objects| {
                objects.contains_key(&(namespace.to_string(), name.to_string()))
            })
    }

    pub async fn object_count(&self) -> usize {
        self.state
            .lock()
            .await
            .objects
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Keys deleted through `ClusterClient::delete`, in order.
    pub async fn deleted(&self) -> Vec<ResourceKey> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn delete_count(&self) -> usize {
        self.state.lock().await.deleted.len()
    }

    pub async fn fail_listing_in(&self, namespace: impl Into<String>) {
        self.state
            .lock()
            .await
            .failing_namespaces
            .insert(namespace.into());
    }

    pub async fn fail_namespace_listing(&self) {
        self.state.lock().await.namespace_listing_fails = true;
    }

    pub async fn deny_deletes_in(&self, namespace: impl Into<String>) {
        self.state
            .lock()
            .await
            .denied_namespaces
            .insert(namespace.into());
    }

    pub async fn allow_deletes_in(&self, namespace: &str) {
        self.state.lock().await.denied_namespaces.remove(namespace);
    }

    /// Delay applied to every client call.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// End every open watch stream.
    pub async fn close_watches(&self) {
        self.state.lock().await.watchers.clear();
    }

    /// Open watch streams for a locator.
    pub async fn watch_count(&self, locator: &ResourceLocator) -> usize {
        self.state
            .lock()
            .await
            .watchers
            .get(locator)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list(
        &self,
        locator: &ResourceLocator,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<TargetInstance>, ClusterError> {
        self.simulate_latency().await;
        let state = self.state.lock().await;
        if !state.installed.contains(locator) {
            return Err(ClusterError::KindNotInstalled(locator.to_string()));
        }
        if let Some(ns) = namespace
            && state.failing_namespaces.contains(ns)
        {
            return Err(ClusterError::Unavailable(format!("listing {locator} in {ns}")));
        }

        let instances = state
            .objects
            .get(locator)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|i| namespace.is_none_or(|ns| i.namespace == ns))
            .filter(|i| selector.is_none_or(|s| s.matches(&i.labels)))
            .cloned()
            .collect();
        Ok(instances)
    }

    async fn watch(
        &self,
        locator: &ResourceLocator,
        namespace: Option<&str>,
    ) -> Result<WatchStream, ClusterError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if !state.installed.contains(locator) {
            return Err(ClusterError::KindNotInstalled(locator.to_string()));
        }
        let (tx, rx) = mpsc::unbounded();
        state.watchers.entry(locator.clone()).or_default().push(tx);

        let namespace = namespace.map(str::to_string);
        let stream = rx.filter(move |event| {
            let keep = namespace
                .as_deref()
                .is_none_or(|ns| event.instance().namespace == ns);
            futures::future::ready(keep)
        });
        Ok(stream.boxed())
    }

    async fn delete(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if state.denied_namespaces.contains(namespace) {
            return Err(ClusterError::Forbidden(format!(
                "cannot delete {locator} {namespace}/{name}"
            )));
        }
        let removed = state
            .objects
            .get_mut(locator)
            .and_then(|objects| objects.remove(&(namespace.to_string(), name.to_string())));
        match removed {
            Some(instance) => {
                state.deleted.push(instance.key());
                state.notify(locator, WatchEvent::Deleted(instance));
                Ok(())
            }
            None => Err(ClusterError::NotFound(format!("{locator} {namespace}/{name}"))),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        self.simulate_latency().await;
        let state = self.state.lock().await;
        if state.namespace_listing_fails {
            return Err(ClusterError::Unavailable("listing namespaces".into()));
        }
        Ok(state.namespaces.iter().cloned().collect())
    }
}
