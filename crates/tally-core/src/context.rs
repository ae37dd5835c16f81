//! Context - 実行コンテキスト（deadline / cancel / referer）
//!
//! すべての Storage 呼び出しは Context 付きで実行される。
//! キャンセルや deadline 超過は `ContextError` として表面化し、
//! 黙って完了することはない。
//!
//! # 使用例
//! ```ignore
//! let ctx = Context::background().with_timeout(Duration::from_secs(2));
//! let poll = service.get(&ctx, "poll-01HV...").await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable request context.
///
/// Clones share one cancellation signal: cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    signal: Arc<CancelSignal>,
    referer: Option<String>,
}

impl Context {
    /// No deadline, not cancelled, no referer.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context with the earlier of the existing deadline and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn with_referer(&self, referer: impl Into<String>) -> Self {
        Self {
            referer: Some(referer.into()),
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::SeqCst);
        self.signal.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::SeqCst)
    }

    /// Current error state, if any.
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Runs `fut` unless the context is cancelled or its deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(ContextError::Cancelled),
            _ = deadline => Err(ContextError::DeadlineExceeded),
        }
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        loop {
            // notified() を先に作ってからフラグを見る（取りこぼし防止）
            let notified = self.signal.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
