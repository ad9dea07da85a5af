//! Errors - エラー型と分類
//!
//! 失敗はできるだけ小さい単位で閉じ込めます：
//! - instance 単位: TTL の値が不正
//! - namespace 単位: 一覧取得の一時的な失敗
//! - policy 単位: 設定エラー、削除権限なし

use thiserror::Error;

use super::document::FieldPathError;
use super::locator::LocatorError;

/// ErrorKind は運用上の分類
///
/// - Config: policy の修正が必要
/// - KindNotInstalled: 対象 kind がクラスタに存在しない（0件として扱う）
/// - InvalidTtl: instance をスキップ
/// - Transient: 次の trigger で自然にリトライ
/// - PermissionDenied: RBAC の変更なしには成功しない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    KindNotInstalled,
    InvalidTtl,
    Transient,
    PermissionDenied,
}

impl ErrorKind {
    /// Will the same operation succeed later without anyone editing anything?
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// A policy that cannot be reconciled until it is edited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error("invalid ttlFieldPath: {0}")]
    FieldPath(#[from] FieldPathError),

    #[error("checkInterval must be greater than zero")]
    ZeroCheckInterval,
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}
