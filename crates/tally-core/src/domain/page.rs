//! ListPage: one window of a paginated poll listing.

use serde::{Deserialize, Serialize};

use super::{Poll, QueryMarker};

/// 取得したページ + 次ページの継続トークン
///
/// `next` は最終ページでも付与される。そこから再開すると空ページが返る。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    pub polls: Vec<Poll>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<QueryMarker>,
}

/// `with_capacity` が先取りする上限。limit 自体には上限がない。
const MAX_PREALLOCATED: usize = 64;

impl ListPage {
    /// Empty page sized for up to `limit` polls.
    pub fn with_capacity(limit: usize) -> Self {
        Self {
            polls: Vec::with_capacity(limit.min(MAX_PREALLOCATED)),
            next: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }
}
