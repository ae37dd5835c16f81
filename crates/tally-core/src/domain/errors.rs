//! Errors - エラー型と分類
//!
//! 呼び出し側（ルーティング層）は `PollError::kind()` だけを見て
//! ステータスを決める。バックエンド固有のエラー文字列を比較してはいけない。

use crate::ports::{GuardError, StoreError};

use super::{IdParseError, MarkerError, PollId, PollValidationError};

/// ErrorKind は呼び出し側に見せるエラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 入力の形が不正（空の質問、範囲外の limit、壊れた cursor など）
    Validation,
    /// ID として解釈できない（存在しない、とは区別する）
    InvalidKey,
    /// ID は正しいがレコードがない
    NotFound,
    /// 投票先の answer が存在しない
    IndexOutOfRange,
    /// referer チェックで拒否された
    Forbidden,
    /// Storage 側の障害（リトライ枯渇、キャンセル、タイムアウトを含む）
    Storage,
}

impl ErrorKind {
    /// HTTP 風のステータスコード
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::InvalidKey | ErrorKind::IndexOutOfRange => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Storage => 500,
        }
    }
}

/// PollError はドメインエラー
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("invalid poll: {0}")]
    Validation(#[from] PollValidationError),

    #[error("limit {limit} outside [{min}, {max}]")]
    LimitOutOfRange { limit: i64, min: usize, max: usize },

    #[error("invalid cursor: {0}")]
    InvalidMarker(#[from] MarkerError),

    #[error("id not valid: {0}")]
    InvalidKey(String),

    #[error("poll not found: {0}")]
    NotFound(PollId),

    #[error("answer {0} not found")]
    IndexOutOfRange(i64),

    #[error("mutation rejected: {0}")]
    Forbidden(#[from] GuardError),

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Validation(_) | PollError::LimitOutOfRange { .. } => ErrorKind::Validation,
            PollError::InvalidMarker(_) => ErrorKind::Validation,
            PollError::InvalidKey(_) => ErrorKind::InvalidKey,
            PollError::NotFound(_) => ErrorKind::NotFound,
            PollError::IndexOutOfRange(_) => ErrorKind::IndexOutOfRange,
            PollError::Forbidden(_) => ErrorKind::Forbidden,
            PollError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Translates a storage error raised while looking up `id`.
    ///
    /// `NoSuchEntity` and `InvalidKey` become domain errors; anything else stays
    /// a storage failure.
    pub fn from_lookup(err: StoreError, id: PollId) -> Self {
        match err {
            StoreError::NoSuchEntity => PollError::NotFound(id),
            StoreError::InvalidKey(reason) => PollError::InvalidKey(reason),
            other => PollError::Storage(other),
        }
    }
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        PollError::Storage(err)
    }
}

impl From<IdParseError> for PollError {
    fn from(err: IdParseError) -> Self {
        PollError::InvalidKey(err.to_string())
    }
}
