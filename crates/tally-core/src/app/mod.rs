//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder**: 設定の検証とワイヤリング
//! - **PollRepository**: Poll の作成・取得・置換・削除・投票（トランザクション）
//! - **PollLister**: limit + cursor によるページング
//! - **PollService**: ルート表の各操作の入口（guard + 入力変換）
//! - **routes**: 公開する操作の静的な表

pub mod builder;
pub mod listing;
mod record;
pub mod repository;
pub mod routes;
pub mod service;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ServiceBuilder};
pub use self::listing::PollLister;
pub use self::repository::PollRepository;
pub use self::routes::{Method, Operation, ROUTES, Route, RouteMatch, resolve};
pub use self::service::PollService;
