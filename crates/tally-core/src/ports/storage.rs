//! Storage port - トランザクション付き KV ストア + クエリ
//!
//! Storage は以下を提供します：
//! - key による get / put（insert or replace）/ delete
//! - read-modify-write を原子的に行うトランザクション
//! - kind 単位のクエリ（limit + 再開用 cursor）
//!
//! # 設計原則
//! - 競合時のリトライは Storage 側の責務（`run_in_transaction` が吸収する）
//! - 呼び出し側は「成功」か「型付きのエラー」しか見ない
//! - cursor の中身は Storage 実装だけが解釈する

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use ulid::Ulid;

use crate::context::{Context, ContextError};
use crate::domain::Cursor;

/// Stored entity body.
pub type Record = serde_json::Value;

/// Entity key: kind + storage-assigned id.
///
/// `id == None` は incomplete key。`put` に渡すと Storage が採番する。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    kind: String,
    id: Option<Ulid>,
}

impl Key {
    pub fn new(kind: impl Into<String>, id: Ulid) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id),
        }
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<Ulid> {
        self.id
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}/{}", self.kind, id),
            None => write!(f, "{}/<incomplete>", self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no such entity")]
    NoSuchEntity,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("concurrent transaction conflict")]
    Conflict,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored record is unreadable: {0}")]
    Corrupt(String),
}

impl From<ContextError> for StoreError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => StoreError::Cancelled,
            ContextError::DeadlineExceeded => StoreError::DeadlineExceeded,
        }
    }
}

/// Query over one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    kind: String,
    limit: Option<usize>,
    start: Option<Cursor>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            limit: None,
            start: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume after the position encoded in `cursor`.
    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn start_cursor(&self) -> Option<&Cursor> {
        self.start.as_ref()
    }
}

/// Lazy result stream of a query.
#[async_trait]
pub trait QueryIterator: Send {
    /// Next `(key, record)`, or `None` when the window is exhausted.
    async fn next(&mut self) -> Result<Option<(Key, Record)>, StoreError>;

    /// Position right after the last yielded entity.
    fn cursor(&self) -> Result<Cursor, StoreError>;
}

/// One read-modify-write unit.
///
/// Read-your-writes が保証される。commit か rollback で必ず終える。
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, key: &Key) -> Result<Record, StoreError>;

    async fn put(&mut self, key: Key, record: Record) -> Result<Key, StoreError>;

    async fn delete(&mut self, key: &Key) -> Result<(), StoreError>;

    /// Apply all buffered writes atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard buffered writes.
    async fn rollback(self: Box<Self>);
}

/// Storage port (interface).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, ctx: &Context, key: &Key) -> Result<Record, StoreError>;

    /// Insert or replace. An incomplete key gets a generated id, which is returned.
    async fn put(&self, ctx: &Context, key: Key, record: Record) -> Result<Key, StoreError>;

    async fn delete(&self, ctx: &Context, key: &Key) -> Result<(), StoreError>;

    async fn begin(&self, ctx: &Context) -> Result<Box<dyn Transaction>, StoreError>;

    async fn query(&self, ctx: &Context, query: Query)
    -> Result<Box<dyn QueryIterator>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Total tries before giving up with `Conflict`.
    pub attempts: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

/// Runs `f` inside a transaction and commits it.
///
/// - `Conflict`（`f` の中でも commit でも）は `options.attempts` 回まで再実行する
/// - それ以外の `f` のエラーは rollback してそのまま返す
/// - `f` は再実行されうるので、外側の値は毎回 clone して使うこと
pub async fn run_in_transaction<S, T, E, F>(
    store: &S,
    ctx: &Context,
    options: TransactionOptions,
    mut f: F,
) -> Result<T, E>
where
    S: Storage + ?Sized,
    T: Send,
    E: From<StoreError> + Send,
    F: for<'t> FnMut(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T, TxError<E>>> + Send,
{
    let attempts = options.attempts.max(1);
    for attempt in 1..=attempts {
        let mut tx = store.begin(ctx).await?;

        let outcome = f(tx.as_mut()).await;
        let value = match outcome {
            Ok(value) => value,
            Err(TxError::Store(StoreError::Conflict)) => {
                tx.rollback().await;
                tracing::warn!(attempt, attempts, "transaction body hit a conflict");
                continue;
            }
            Err(TxError::Store(err)) => {
                tx.rollback().await;
                return Err(err.into());
            }
            Err(TxError::Abort(err)) => {
                tx.rollback().await;
                return Err(err);
            }
        };

        match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict) => {
                tracing::warn!(attempt, attempts, "transaction commit conflicted");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(StoreError::Conflict.into())
}

/// Error returned from a transaction body.
///
/// `Store` は Storage 由来（`Conflict` ならリトライ対象）、
/// `Abort` は呼び出し側のドメインエラーでそのまま返される。
#[derive(Debug)]
pub enum TxError<E> {
    Store(StoreError),
    Abort(E),
}

impl<E> From<StoreError> for TxError<E> {
    fn from(err: StoreError) -> Self {
        TxError::Store(err)
    }
}
