//! reaper-core
//!
//! Core building blocks for the TTL reaper: a garbage collector that deletes
//! finished cluster resources once their time-to-live has elapsed.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（policy, locator, instance, classifier, ttl, errors, events）
//! - **ports**: 抽象化レイヤー（ClusterClient, Clock, IdGenerator, EventSink, PolicyFeed）
//! - **app**: アプリケーションロジック（controller, reconciler, scheduler, watch registry, など）
//! - **queue**: policy 名をキーにした work queue とバックオフ
//! - **impls**: 実装（InMemoryCluster, TracingEventSink など）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
