//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryCluster**: 開発用・テスト用の ClusterClient
//! - **TracingEventSink**: 本番用の EventSink（構造化ログ）
//! - **RecordingEventSink** / **FanoutEventSink**: テスト・CLI 用
//!
//! 実クラスタ向けの ClusterClient は別クレートに置く想定です。

pub mod event_sink;
pub mod inmem_cluster;

pub use self::event_sink::{FanoutEventSink, RecordingEventSink, TracingEventSink};
pub use self::inmem_cluster::{InMemoryCluster, PutError};
