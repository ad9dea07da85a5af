//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **ControllerBuilder**: コントローラの構築とワイヤリング
//! - **Controller**: policy feed・watch trigger・定期実行をまとめる reconciliation loop
//! - **PolicyReconciler**: policy 1件分の pass（resolve→list→classify→schedule）
//! - **TargetLister**: namespace 単位の一覧取得
//! - **ExpirationScheduler**: 期限計算とタイマー管理
//! - **DeletionExecutor**: 削除と結果の分類
//! - **WatchRegistry**: locator ごとの change watch
//! - **WorkerGroup**: reconcile ワーカー
//! - **StatusBoard**: policy ごとの状態

pub mod builder;
pub mod controller;
pub mod deleter;
pub mod lister;
pub mod reconciler;
pub mod scheduler;
pub mod status;
pub mod watch_registry;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ControllerBuilder};
pub use self::controller::{Controller, ControllerSettings};
pub use self::deleter::{DeleteOutcome, DeletionExecutor};
pub use self::lister::{NamespaceListing, TargetLister};
pub use self::reconciler::{PolicyReconciler, ReconcileError, ReconcileReport};
pub use self::scheduler::{Evaluation, ExpirationScheduler, ScheduleOutcome, evaluate};
pub use self::status::{PolicyStatus, StatusBoard};
pub use self::watch_registry::WatchRegistry;
pub use self::worker_loop::{KeyHandler, WorkerGroup};
