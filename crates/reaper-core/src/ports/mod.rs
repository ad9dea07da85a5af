//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（クラスタ API、policy ストア、ログ基盤）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - クラスタは List / Watch / Delete / ListNamespaces だけで扱う
//! - policy ストアは順序付きのイベント feed としてだけ見る
//! - 時刻と ID はテストで差し替えられるようにする

pub mod clock;
pub mod cluster;
pub mod event_sink;
pub mod id_generator;
pub mod policy_feed;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::cluster::{ClusterClient, ClusterError, WatchEvent, WatchStream};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::policy_feed::{PolicyEvent, PolicyFeed, PolicyFeedSender, policy_feed};
