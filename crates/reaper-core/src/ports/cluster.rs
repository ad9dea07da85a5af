//! ClusterClient port - 汎用 List / Watch / Delete
//!
//! 型付きクライアントは使わず、ResourceLocator だけで任意の kind を扱います。
//! informer cache や leader election はこの trait の向こう側の話です。

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::{ErrorKind, LabelSelector, ResourceLocator, TargetInstance};

/// One change observed on a watched resource type.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(TargetInstance),
    Modified(TargetInstance),
    Deleted(TargetInstance),
}

impl WatchEvent {
    pub fn instance(&self) -> &TargetInstance {
        match self {
            WatchEvent::Added(i) | WatchEvent::Modified(i) | WatchEvent::Deleted(i) => i,
        }
    }

    /// Add and update events may change what a pass decides; deletes cannot.
    pub fn is_relevant(&self) -> bool {
        !matches!(self, WatchEvent::Deleted(_))
    }
}

pub type WatchStream = BoxStream<'static, WatchEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("resource type {0} is not installed")]
    KindNotInstalled(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cluster call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    /// `NotFound` has no kind of its own: callers decide whether it is a success.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::KindNotInstalled(_) => ErrorKind::KindNotInstalled,
            ClusterError::Forbidden(_) => ErrorKind::PermissionDenied,
            ClusterError::NotFound(_) | ClusterError::Timeout(_) | ClusterError::Unavailable(_) => {
                ErrorKind::Transient
            }
        }
    }
}

/// ClusterClient は汎用リソース操作の窓口
///
/// # 契約
/// - `namespace = None` はクラスタ全体
/// - `list` のラベルフィルタは実装側で適用する
/// - `delete` が対象なしの場合は `ClusterError::NotFound`
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list(
        &self,
        locator: &ResourceLocator,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<TargetInstance>, ClusterError>;

    async fn watch(
        &self,
        locator: &ResourceLocator,
        namespace: Option<&str>,
    ) -> Result<WatchStream, ClusterError>;

    async fn delete(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError>;
}
