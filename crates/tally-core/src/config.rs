//! Config - サービス設定
//!
//! JSON で与える。省略したフィールドはすべてデフォルト値になる。
//!
//! ```json
//! {
//!   "list": { "default_limit": 10, "min_limit": 1, "max_limit": 50 },
//!   "transaction": { "attempts": 3, "lock_timeout_ms": 5000 },
//!   "allowed_referers": ["https://polls.example.com/"]
//! }
//! ```

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::PollError;
use crate::ports::TransactionOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Page-size bounds for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListLimits {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_min_limit")]
    pub min_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_limit() -> usize {
    10
}

fn default_min_limit() -> usize {
    1
}

fn default_max_limit() -> usize {
    50
}

impl Default for ListLimits {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            min_limit: default_min_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl ListLimits {
    /// Resolves a caller-supplied limit: `None` means the default, anything
    /// outside `[min_limit, max_limit]` is rejected.
    pub fn resolve(&self, requested: Option<i64>) -> Result<NonZeroUsize, PollError> {
        let out_of_range = |limit: i64| PollError::LimitOutOfRange {
            limit,
            min: self.min_limit,
            max: self.max_limit,
        };

        let limit = match requested {
            None => self.default_limit,
            Some(raw) => {
                let limit = usize::try_from(raw).map_err(|_| out_of_range(raw))?;
                if limit < self.min_limit || limit > self.max_limit {
                    return Err(out_of_range(raw));
                }
                limit
            }
        };
        NonZeroUsize::new(limit).ok_or_else(|| out_of_range(0))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_limit == 0 {
            return Err(ConfigError::Invalid("list.min_limit must be at least 1".into()));
        }
        if self.min_limit > self.max_limit {
            return Err(ConfigError::Invalid(format!(
                "list.min_limit ({}) exceeds list.max_limit ({})",
                self.min_limit, self.max_limit
            )));
        }
        if !(self.min_limit..=self.max_limit).contains(&self.default_limit) {
            return Err(ConfigError::Invalid(format!(
                "list.default_limit ({}) outside [{}, {}]",
                self.default_limit, self.min_limit, self.max_limit
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Total tries of a conflicting transaction.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// In-memory store: how long to wait for a key lock before reporting a conflict.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl TransactionConfig {
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions {
            attempts: self.attempts,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub list: ListLimits,

    #[serde(default)]
    pub transaction: TransactionConfig,

    /// Referer prefixes allowed to mutate. Empty = allow everything.
    #[serde(default)]
    pub allowed_referers: Vec<String>,
}

impl ServiceConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.list.validate()?;
        if self.transaction.attempts == 0 {
            return Err(ConfigError::Invalid(
                "transaction.attempts must be at least 1".into(),
            ));
        }
        if self.transaction.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transaction.lock_timeout_ms must be positive".into(),
            ));
        }
        if self.allowed_referers.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "allowed_referers must not contain blank entries".into(),
            ));
        }
        Ok(())
    }
}
