//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発用・テスト用の Storage

pub mod memory_store;

// 主要な型を再エクスポート
pub use self::memory_store::InMemoryStore;
