//! InMemoryStore - 開発用・テスト用の Storage 実装
//!
//! # 実装詳細
//! - kind ごとに `BTreeMap<Ulid, Record>`（key 順 = クエリ順）
//! - key ごとの排他ロック（tokio Mutex）をタイムアウト付きで取る
//! - トランザクションは最初に触った key のロックを commit / rollback まで保持する
//!   → 同じ key への read-modify-write は直列化される
//! - ロック取得のタイムアウトは `Conflict`（`run_in_transaction` がリトライする）
//! - ロック表のエントリは最後の保持者が手放した時点で消える
//! - クエリはライブな map を位置（最後に返した ULID）から辿る。スナップショットではない
//!
//! # cursor 形式
//! - 空: 先頭から
//! - 16 バイト: その ULID の直後から
//! - それ以外: `InvalidCursor`

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::context::Context;
use crate::domain::Cursor;
use crate::ports::{
    IdGenerator, Key, Query, QueryIterator, Record, Storage, StoreError, SystemClock, Transaction,
    UlidGenerator,
};

/// Default lock acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Default)]
struct StoreState {
    kinds: HashMap<String, BTreeMap<Ulid, Record>>,
}

impl StoreState {
    fn get(&self, kind: &str, id: Ulid) -> Option<&Record> {
        self.kinds.get(kind).and_then(|m| m.get(&id))
    }

    fn contains(&self, kind: &str, id: Ulid) -> bool {
        self.get(kind, id).is_some()
    }

    fn insert(&mut self, kind: &str, id: Ulid, record: Record) {
        self.kinds
            .entry(kind.to_string())
            .or_default()
            .insert(id, record);
    }

    fn remove(&mut self, kind: &str, id: Ulid) -> Option<Record> {
        self.kinds.get_mut(kind).and_then(|m| m.remove(&id))
    }

    /// First entity strictly after `position` (or the first one at all).
    fn next_after(&self, kind: &str, position: Option<Ulid>) -> Option<(Ulid, Record)> {
        let map = self.kinds.get(kind)?;
        let lower = match position {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        map.range((lower, Bound::Unbounded))
            .next()
            .map(|(id, record)| (*id, record.clone()))
    }
}

/// Per-key exclusive locks.
///
/// エントリは誰かが保持・待機している間だけ表に残る。
#[derive(Default)]
struct KeyLocks {
    table: std::sync::Mutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(self: &Arc<Self>, key: &Key, timeout: Duration) -> Result<KeyGuard, StoreError> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            // タイムアウト・キャンセルで待機を諦めたエントリを掃除
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(key.clone()).or_default())
        };
        let acquired = tokio::time::timeout(timeout, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(KeyGuard {
                locks: Arc::clone(self),
                key: key.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release(key, None);
                tracing::debug!(%key, timeout_ms = timeout.as_millis() as u64, "key lock timed out");
                Err(StoreError::Conflict)
            }
        }
    }

    /// Drops `guard` and forgets `key` when nobody else holds or awaits it.
    fn release(&self, key: &Key, guard: Option<OwnedMutexGuard<()>>) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        drop(guard);
        if table.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held key lock; releasing it prunes the lock table.
struct KeyGuard {
    locks: Arc<KeyLocks>,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key, self.guard.take());
    }
}

fn require_id(key: &Key) -> Result<Ulid, StoreError> {
    if key.kind().is_empty() {
        return Err(StoreError::InvalidKey("key has no kind".to_string()));
    }
    key.id()
        .ok_or_else(|| StoreError::InvalidKey(format!("incomplete key {key}")))
}

fn decode_cursor(cursor: &Cursor) -> Result<Option<Ulid>, StoreError> {
    let bytes = cursor.as_bytes();
    if bytes.is_empty() {
        return Ok(None);
    }
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidCursor(format!("expected 16 bytes, got {}", bytes.len())))?;
    Ok(Some(Ulid::from_bytes(raw)))
}

fn encode_cursor(position: Option<Ulid>) -> Cursor {
    match position {
        Some(id) => Cursor::from_bytes(id.to_bytes().to_vec()),
        None => Cursor::default(),
    }
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

/// In-memory Storage implementation.
///
/// # 使用例
/// ```ignore
/// let store = InMemoryStore::new().with_lock_timeout(Duration::from_secs(1));
/// let key = store.put(&ctx, Key::incomplete("Poll"), record).await?;
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    locks: Arc<KeyLocks>,
    ids: Arc<dyn IdGenerator>,
    lock_timeout: Duration,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            locks: Arc::new(KeyLocks::default()),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            latency: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Adds an artificial delay to every storage call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Number of stored entities of `kind`.
    pub async fn count(&self, kind: &str) -> usize {
        let state = self.state.lock().await;
        state.kinds.get(kind).map_or(0, BTreeMap::len)
    }

    fn complete(&self, key: Key) -> Key {
        match key.id() {
            Some(_) => key,
            None => Key::new(key.kind(), self.ids.generate()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn get(&self, ctx: &Context, key: &Key) -> Result<Record, StoreError> {
        let id = require_id(key)?;
        ctx.run(async {
            simulate_latency(self.latency).await;
            let state = self.state.lock().await;
            state
                .get(key.kind(), id)
                .cloned()
                .ok_or(StoreError::NoSuchEntity)
        })
        .await?
    }

    async fn put(&self, ctx: &Context, key: Key, record: Record) -> Result<Key, StoreError> {
        if key.kind().is_empty() {
            return Err(StoreError::InvalidKey("key has no kind".to_string()));
        }
        let key = self.complete(key);
        ctx.run(async {
            simulate_latency(self.latency).await;
            let _guard = self.locks.acquire(&key, self.lock_timeout).await?;
            let id = require_id(&key)?;
            self.state.lock().await.insert(key.kind(), id, record);
            Ok::<_, StoreError>(key)
        })
        .await?
    }

    async fn delete(&self, ctx: &Context, key: &Key) -> Result<(), StoreError> {
        let id = require_id(key)?;
        ctx.run(async {
            simulate_latency(self.latency).await;
            let _guard = self.locks.acquire(key, self.lock_timeout).await?;
            self.state
                .lock()
                .await
                .remove(key.kind(), id)
                .map(|_| ())
                .ok_or(StoreError::NoSuchEntity)
        })
        .await?
    }

    async fn begin(&self, ctx: &Context) -> Result<Box<dyn Transaction>, StoreError> {
        ctx.run(simulate_latency(self.latency)).await?;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            ctx: ctx.clone(),
            guards: HashMap::new(),
            writes: BTreeMap::new(),
        }))
    }

    async fn query(
        &self,
        ctx: &Context,
        query: Query,
    ) -> Result<Box<dyn QueryIterator>, StoreError> {
        let position = match query.start_cursor() {
            Some(cursor) => decode_cursor(cursor)?,
            None => None,
        };
        ctx.run(simulate_latency(self.latency)).await?;
        Ok(Box::new(MemoryQueryIter {
            store: self.clone(),
            ctx: ctx.clone(),
            kind: query.kind().to_string(),
            position,
            remaining: query.limit_value(),
        }))
    }
}

/// Transaction over InMemoryStore.
struct MemoryTransaction {
    store: InMemoryStore,
    ctx: Context,
    /// 触った key のロック（commit / rollback まで保持）
    guards: HashMap<Key, KeyGuard>,
    /// None は削除
    writes: BTreeMap<Key, Option<Record>>,
}

impl MemoryTransaction {
    async fn lock(&mut self, key: &Key) -> Result<(), StoreError> {
        if self.guards.contains_key(key) {
            return Ok(());
        }
        let guard = self
            .ctx
            .run(self.store.locks.acquire(key, self.store.lock_timeout))
            .await??;
        self.guards.insert(key.clone(), guard);
        Ok(())
    }

    async fn exists(&self, key: &Key, id: Ulid) -> Result<bool, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.is_some());
        }
        let state = self.ctx.run(self.store.state.lock()).await?;
        Ok(state.contains(key.kind(), id))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &Key) -> Result<Record, StoreError> {
        let id = require_id(key)?;
        self.lock(key).await?;

        if let Some(pending) = self.writes.get(key) {
            return pending.clone().ok_or(StoreError::NoSuchEntity);
        }
        let latency = self.store.latency;
        self.ctx
            .run(async {
                simulate_latency(latency).await;
                let state = self.store.state.lock().await;
                state
                    .get(key.kind(), id)
                    .cloned()
                    .ok_or(StoreError::NoSuchEntity)
            })
            .await?
    }

    async fn put(&mut self, key: Key, record: Record) -> Result<Key, StoreError> {
        if key.kind().is_empty() {
            return Err(StoreError::InvalidKey("key has no kind".to_string()));
        }
        let key = self.store.complete(key);
        self.lock(&key).await?;
        self.writes.insert(key.clone(), Some(record));
        Ok(key)
    }

    async fn delete(&mut self, key: &Key) -> Result<(), StoreError> {
        let id = require_id(key)?;
        self.lock(key).await?;
        if !self.exists(key, id).await? {
            return Err(StoreError::NoSuchEntity);
        }
        self.writes.insert(key.clone(), None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            store,
            ctx,
            guards,
            writes,
        } = *self;

        ctx.run(async {
            simulate_latency(store.latency).await;
            let mut state = store.state.lock().await;
            for (key, write) in writes {
                let Some(id) = key.id() else { continue };
                match write {
                    Some(record) => state.insert(key.kind(), id, record),
                    None => {
                        state.remove(key.kind(), id);
                    }
                }
            }
        })
        .await?;

        // 書き込みが反映された後でロックを手放す
        drop(guards);
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        // writes と guards を捨てるだけ
    }
}

/// Query iterator over InMemoryStore.
struct MemoryQueryIter {
    store: InMemoryStore,
    ctx: Context,
    kind: String,
    position: Option<Ulid>,
    remaining: Option<usize>,
}

#[async_trait]
impl QueryIterator for MemoryQueryIter {
    async fn next(&mut self) -> Result<Option<(Key, Record)>, StoreError> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        let found = self
            .ctx
            .run(async {
                simulate_latency(self.store.latency).await;
                let state = self.store.state.lock().await;
                state.next_after(&self.kind, self.position)
            })
            .await?;

        let Some((id, record)) = found else {
            return Ok(None);
        };
        self.position = Some(id);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(Some((Key::new(self.kind.clone(), id), record)))
    }

    fn cursor(&self) -> Result<Cursor, StoreError> {
        Ok(encode_cursor(self.position))
    }
}
