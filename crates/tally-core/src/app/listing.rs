//! PollLister - limit + cursor によるページング一覧
//!
//! # 継続トークン
//! - `next` は常に付与する（最終ページでも）
//! - 末尾を越えた位置から再開しても空ページ + 新しい `next` が返るだけ
//! - Storage が解釈できない cursor は `InvalidMarker`（= bad request）

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::context::Context;
use crate::domain::{ListPage, MarkerError, PollError, QueryMarker};
use crate::ports::{Query, Storage, StoreError};

use super::record::{decode, poll_id, poll_kind};

pub struct PollLister<S: ?Sized> {
    store: Arc<S>,
}

impl<S> PollLister<S>
where
    S: Storage + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns at most `limit` polls in store order, starting after `after`.
    pub async fn list(
        &self,
        ctx: &Context,
        limit: NonZeroUsize,
        after: Option<&QueryMarker>,
    ) -> Result<ListPage, PollError> {
        let mut query = Query::new(poll_kind()).limit(limit.get());
        if let Some(marker) = after {
            query = query.start(marker.cursor().clone());
        }

        let mut iter = self.store.query(ctx, query).await.map_err(foreign_cursor)?;

        let mut page = ListPage::with_capacity(limit.get());
        while let Some((key, record)) = iter.next().await? {
            let id = poll_id(&key)?;
            page.polls.push(decode(record, id)?);
        }
        page.next = Some(QueryMarker::new(iter.cursor()?));

        tracing::debug!(
            limit = limit.get(),
            resumed = after.is_some(),
            returned = page.polls.len(),
            "listed polls"
        );
        Ok(page)
    }
}

fn foreign_cursor(err: StoreError) -> PollError {
    match err {
        StoreError::InvalidCursor(reason) => {
            tracing::debug!(%reason, "store rejected cursor");
            PollError::InvalidMarker(MarkerError::Foreign)
        }
        other => PollError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::repository::PollRepository;
    use crate::domain::{Cursor, ErrorKind, PollDraft, PollId};
    use crate::impls::InMemoryStore;
    use crate::ports::SystemClock;
    use std::collections::HashSet;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    async fn seeded(n: usize) -> (PollLister<InMemoryStore>, Vec<PollId>) {
        let store = Arc::new(InMemoryStore::new());
        let repo = PollRepository::new(store.clone(), SystemClock);
        let ctx = Context::background();
        let mut ids = Vec::new();
        for i in 0..n {
            let poll = repo
                .create(&ctx, PollDraft::new(format!("Q{i}"), ["a", "b"]))
                .await
                .unwrap();
            ids.push(poll.uid.unwrap());
        }
        (PollLister::new(store), ids)
    }

    #[tokio::test]
    async fn empty_collection_still_has_next() {
        let (lister, _) = seeded(0).await;
        let page = lister.list(&Context::background(), nz(10), None).await.unwrap();

        assert!(page.is_empty());
        assert!(page.next.is_some());
    }

    #[tokio::test]
    async fn limit_one_walks_every_poll_once() {
        let (lister, ids) = seeded(4).await;
        let ctx = Context::background();

        let mut seen = HashSet::new();
        let mut marker = None;
        loop {
            let page = lister.list(&ctx, nz(1), marker.as_ref()).await.unwrap();
            assert!(page.polls.len() <= 1);
            if page.is_empty() {
                break;
            }
            for poll in &page.polls {
                assert!(seen.insert(poll.uid.unwrap()));
            }
            marker = page.next;
        }

        assert_eq!(seen, ids.into_iter().collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn window_larger_than_collection() {
        let (lister, ids) = seeded(3).await;
        let ctx = Context::background();

        let first = lister.list(&ctx, nz(10), None).await.unwrap();
        assert_eq!(first.polls.len(), ids.len());

        let rest = lister.list(&ctx, nz(10), first.next.as_ref()).await.unwrap();
        assert!(rest.is_empty());
        assert!(rest.next.is_some());
    }

    #[tokio::test]
    async fn marker_survives_token_round_trip() {
        let (lister, ids) = seeded(3).await;
        let ctx = Context::background();

        let first = lister.list(&ctx, nz(2), None).await.unwrap();
        let next = first.next.unwrap();
        let marker = QueryMarker::decode(&next.encode()).unwrap();
        assert_eq!(marker, next);

        let second = lister.list(&ctx, nz(2), Some(&marker)).await.unwrap();
        assert_eq!(second.polls.len(), 1);
        assert_eq!(second.polls[0].uid, Some(ids[2]));
    }

    #[tokio::test]
    async fn huge_limit_returns_whole_collection() {
        let (lister, ids) = seeded(3).await;
        let ctx = Context::background();

        let page = lister
            .list(&ctx, nz(usize::MAX / 2), None)
            .await
            .unwrap();

        let got: Vec<PollId> = page.polls.iter().filter_map(|p| p.uid).collect();
        assert_eq!(got, ids);
        assert!(page.next.is_some());
    }

    #[tokio::test]
    async fn rejected_cursor_is_bad_request() {
        let (lister, _) = seeded(1).await;
        let marker = QueryMarker::new(Cursor::from_bytes(vec![1, 2, 3]));

        let err = lister
            .list(&Context::background(), nz(5), Some(&marker))
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::InvalidMarker(MarkerError::Foreign)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
