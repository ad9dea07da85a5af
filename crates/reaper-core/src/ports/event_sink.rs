//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - TracingEventSink: 構造化ログとして出力（本番用）
//! - RecordingEventSink: メモリに記録（テスト用）

use crate::domain::ReapEvent;

/// EventSink はドメインイベントを記録
///
/// emit は同期的で、失敗しません。timer タスクからも呼ばれるため
/// 重い処理をしないこと。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ReapEvent);
}
