//! tally-core
//!
//! Core building blocks for the Tally poll service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, poll, marker, page, errors）
//! - **ports**: 抽象化レイヤー（Storage, Clock, IdGenerator, MutationGuard）
//! - **impls**: 実装（InMemoryStore など開発用）
//! - **app**: アプリケーションロジック（repository, listing, service, routes, builder）
//! - **config**: サービス設定（JSON）
//! - **context**: deadline / cancel / referer を運ぶ実行コンテキスト

pub mod app;
pub mod config;
pub mod context;
pub mod domain;
pub mod impls;
pub mod ports;
