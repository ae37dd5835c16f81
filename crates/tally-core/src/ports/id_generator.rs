//! IdGenerator port - 新しいエンティティの ULID 採番
//!
//! Storage が incomplete key を受け取ったときに呼ばれる。
//! ULID の順序がそのままクエリ順になるので、採番順 = 一覧順。

use std::sync::Mutex;

use ulid::Ulid;

use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Ulid;
}

/// Clock-driven ULIDs that never go backwards.
///
/// 同じミリ秒内（または時計が戻ったとき）は直前の値を +1 する。
/// FixedClock を渡すと timestamp 部分は固定のまま単調増加する。
pub struct UlidGenerator<C> {
    clock: C,
    last: Mutex<Option<Ulid>>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        let fresh = Ulid::from_parts(timestamp_ms, rand::random());

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last {
            // increment は random 部分が溢れたときだけ None
            Some(prev) if fresh <= prev => prev.increment().unwrap_or(fresh),
            _ => fresh,
        };
        *last = Some(next);
        next
    }
}
