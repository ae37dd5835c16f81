//! ServiceBuilder - PollService の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - build() の時点で設定を検証し、不正なら BuildError を返す
//! - 実行中に「limit の範囲が壊れている」といった状態にはならない

use std::sync::Arc;

use crate::config::{ConfigError, ServiceConfig};
use crate::impls::InMemoryStore;
use crate::ports::{AllowAll, Clock, MutationGuard, RefererAllowList, Storage, SystemClock};

use super::listing::PollLister;
use super::repository::PollRepository;
use super::service::PollService;

/// ServiceBuilder は PollService を構築
///
/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new(ServiceConfig::load("tally.json")?)
///     .build_in_memory()?;
/// ```
pub struct ServiceBuilder<C = SystemClock> {
    config: ServiceConfig,
    clock: C,
    guard: Option<Arc<dyn MutationGuard>>,
}

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceBuilder<SystemClock> {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            clock: SystemClock,
            guard: None,
        }
    }
}

impl<C: Clock> ServiceBuilder<C> {
    /// Clock を差し替える（テスト用）
    pub fn clock<C2: Clock>(self, clock: C2) -> ServiceBuilder<C2> {
        ServiceBuilder {
            config: self.config,
            clock,
            guard: self.guard,
        }
    }

    /// 設定の allowed_referers の代わりに任意の guard を使う
    pub fn guard(mut self, guard: impl MutationGuard + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Wires the service over an in-memory store configured from `transaction`.
    pub fn build_in_memory(self) -> Result<PollService<InMemoryStore, C>, BuildError> {
        self.config.validate()?;
        let store = InMemoryStore::new().with_lock_timeout(self.config.transaction.lock_timeout());
        self.build_with(Arc::new(store))
    }

    pub fn build_with<S>(self, store: Arc<S>) -> Result<PollService<S, C>, BuildError>
    where
        S: Storage + ?Sized,
    {
        self.config.validate()?;

        let guard: Arc<dyn MutationGuard> = match self.guard {
            Some(guard) => guard,
            None if self.config.allowed_referers.is_empty() => Arc::new(AllowAll),
            None => Arc::new(RefererAllowList::new(
                self.config.allowed_referers.iter().cloned(),
            )),
        };

        let repo = PollRepository::new(store.clone(), self.clock)
            .with_transaction_options(self.config.transaction.options());
        let lister = PollLister::new(store);

        tracing::debug!(
            default_limit = self.config.list.default_limit,
            max_limit = self.config.list.max_limit,
            attempts = self.config.transaction.attempts,
            referers = self.config.allowed_referers.len(),
            "poll service built"
        );
        Ok(PollService::new(repo, lister, guard, self.config.list))
    }
}
