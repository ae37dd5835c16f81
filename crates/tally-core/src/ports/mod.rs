//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 実装の詳細（どの KV ストアを使うか等）は impls 側に閉じ込める。

pub mod clock;
pub mod guard;
pub mod id_generator;
pub mod storage;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::guard::{AllowAll, GuardError, MutationGuard, RefererAllowList};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::storage::{
    Key, Query, QueryIterator, Record, Storage, StoreError, Transaction, TransactionOptions,
    TxError, run_in_transaction,
};
