//! PollRepository - Poll の作成・取得・置換・削除・投票
//!
//! # 不変条件
//! - 書き込み前に必ず `Poll::validate()` を通す
//! - 「読んだ値を元に同じレコードへ書く」操作（replace / vote）は必ずトランザクション内
//! - Storage の not-found / 不正 key はここでドメインエラーに翻訳する
//! - リトライはしない（`run_in_transaction` = Storage 側の責務）

use std::sync::Arc;

use crate::context::Context;
use crate::domain::{Poll, PollDraft, PollError, PollId};
use crate::ports::{
    Clock, Key, Storage, StoreError, TransactionOptions, TxError, run_in_transaction,
};

use super::record::{decode, encode, poll_id, poll_key, poll_kind};

/// Lookup failures inside a transaction body.
///
/// not-found / 不正 key はドメインエラーとして中断、それ以外（Conflict 含む）は
/// Storage に返してリトライ判定させる。
fn lookup_in_tx(err: StoreError, id: PollId) -> TxError<PollError> {
    match err {
        StoreError::NoSuchEntity | StoreError::InvalidKey(_) => {
            TxError::Abort(PollError::from_lookup(err, id))
        }
        other => TxError::Store(other),
    }
}

/// Repository for polls over any Storage.
pub struct PollRepository<S: ?Sized, C> {
    store: Arc<S>,
    clock: C,
    tx_options: TransactionOptions,
}

impl<S, C> PollRepository<S, C>
where
    S: Storage + ?Sized,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            tx_options: TransactionOptions::default(),
        }
    }

    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.tx_options = options;
        self
    }

    /// Creates and persists a new poll; storage assigns the uid.
    pub async fn create(&self, ctx: &Context, draft: PollDraft) -> Result<Poll, PollError> {
        let mut poll = Poll::from_draft(draft, self.clock.now());
        poll.validate()?;

        let key = self
            .store
            .put(ctx, Key::incomplete(poll_kind()), encode(&poll)?)
            .await?;
        let id = poll_id(&key)?;
        poll.uid = Some(id);

        tracing::info!(poll = %id, answers = poll.answers.len(), "poll created");
        Ok(poll)
    }

    pub async fn fetch(&self, ctx: &Context, id: &PollId) -> Result<Poll, PollError> {
        let record = self
            .store
            .get(ctx, &poll_key(id))
            .await
            .map_err(|e| PollError::from_lookup(e, *id))?;
        decode(record, *id)
    }

    /// Overwrites question and answers in one transaction.
    ///
    /// `uid` と `created` は変わらない。`updated` は更新する。
    ///
    /// Votes are carried over: a new answer whose text equals an existing
    /// answer keeps that answer's count (first match wins); other answers
    /// start at zero.
    pub async fn replace(
        &self,
        ctx: &Context,
        id: &PollId,
        draft: PollDraft,
    ) -> Result<Poll, PollError> {
        let now = self.clock.now();
        Poll::from_draft(draft.clone(), now).validate()?;

        let id = *id;
        let key = poll_key(&id);
        let poll = run_in_transaction(self.store.as_ref(), ctx, self.tx_options, |tx| {
            let key = key.clone();
            let draft = draft.clone();
            Box::pin(async move {
                let record = tx.get(&key).await.map_err(|e| lookup_in_tx(e, id))?;
                let mut poll = decode(record, id).map_err(TxError::Abort)?;
                poll.apply_draft(draft, now);
                tx.put(key, encode(&poll)?).await?;
                Ok::<_, TxError<PollError>>(poll)
            })
        })
        .await?;

        tracing::debug!(poll = %id, answers = poll.answers.len(), "poll replaced");
        Ok(poll)
    }

    pub async fn delete(&self, ctx: &Context, id: &PollId) -> Result<(), PollError> {
        self.store
            .delete(ctx, &poll_key(id))
            .await
            .map_err(|e| PollError::from_lookup(e, *id))?;

        tracing::info!(poll = %id, "poll deleted");
        Ok(())
    }

    /// Adds exactly one vote to `answer` in one transaction.
    ///
    /// 範囲外の index は書き込みなしで `IndexOutOfRange`。
    pub async fn vote(&self, ctx: &Context, id: &PollId, answer: usize) -> Result<(), PollError> {
        let now = self.clock.now();
        let id = *id;
        let key = poll_key(&id);

        run_in_transaction(self.store.as_ref(), ctx, self.tx_options, |tx| {
            let key = key.clone();
            Box::pin(async move {
                let record = tx.get(&key).await.map_err(|e| lookup_in_tx(e, id))?;
                let mut poll = decode(record, id).map_err(TxError::Abort)?;
                if !poll.record_vote(answer, now) {
                    let index = i64::try_from(answer).unwrap_or(i64::MAX);
                    return Err(TxError::Abort(PollError::IndexOutOfRange(index)));
                }
                tx.put(key, encode(&poll)?).await?;
                Ok::<_, TxError<PollError>>(())
            })
        })
        .await?;

        tracing::debug!(poll = %id, answer, "vote recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone, Utc};
    use ulid::Ulid;

    fn setup() -> (PollRepository<InMemoryStore, FixedClock>, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let repo = PollRepository::new(Arc::new(InMemoryStore::new()), clock.clone());
        (repo, clock)
    }

    fn yes_no() -> PollDraft {
        PollDraft::new("Q?", ["Yes", "No"])
    }

    #[tokio::test]
    async fn create_assigns_uid_and_zero_votes() {
        let (repo, clock) = setup();
        let ctx = Context::background();

        let poll = repo.create(&ctx, yes_no()).await.unwrap();

        assert!(poll.uid.is_some());
        assert_eq!(poll.created, clock.now());
        assert_eq!(poll.updated, clock.now());
        assert!(poll.answers.iter().all(|a| a.votes == 0));
        assert_eq!(repo.fetch(&ctx, &poll.uid.unwrap()).await.unwrap(), poll);
    }

    #[tokio::test]
    async fn create_rejects_invalid_without_writing() {
        let store = Arc::new(InMemoryStore::new());
        let repo = PollRepository::new(store.clone(), FixedClock::new(Utc::now()));
        let ctx = Context::background();

        let err = repo
            .create(&ctx, PollDraft::new("", ["Yes"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.count(poll_kind()).await, 0);
    }

    #[tokio::test]
    async fn vote_refreshes_updated_only() {
        let (repo, clock) = setup();
        let ctx = Context::background();
        let poll = repo.create(&ctx, yes_no()).await.unwrap();
        let id = poll.uid.unwrap();

        clock.advance(Duration::seconds(10));
        repo.vote(&ctx, &id, 1).await.unwrap();

        let after = repo.fetch(&ctx, &id).await.unwrap();
        assert_eq!(after.answers[0].votes, 0);
        assert_eq!(after.answers[1].votes, 1);
        assert_eq!(after.created, poll.created);
        assert_eq!(after.updated, clock.now());
    }

    #[tokio::test]
    async fn vote_out_of_range_leaves_counts() {
        let (repo, _) = setup();
        let ctx = Context::background();
        let id = repo.create(&ctx, yes_no()).await.unwrap().uid.unwrap();

        let err = repo.vote(&ctx, &id, 5).await.unwrap_err();

        assert!(matches!(err, PollError::IndexOutOfRange(5)));
        let after = repo.fetch(&ctx, &id).await.unwrap();
        assert_eq!(after.total_votes(), 0);
    }

    #[tokio::test]
    async fn replace_keeps_identity() {
        let (repo, clock) = setup();
        let ctx = Context::background();
        let poll = repo.create(&ctx, yes_no()).await.unwrap();
        let id = poll.uid.unwrap();

        clock.advance(Duration::minutes(1));
        let replaced = repo
            .replace(&ctx, &id, PollDraft::new("New Q", ["A", "B", "C"]))
            .await
            .unwrap();

        assert_eq!(replaced.uid, Some(id));
        assert_eq!(replaced.created, poll.created);
        assert_eq!(replaced.updated, clock.now());
        assert_eq!(replaced.question, "New Q");
        assert_eq!(replaced.answers.len(), 3);
        assert_eq!(repo.fetch(&ctx, &id).await.unwrap(), replaced);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_everywhere() {
        let (repo, _) = setup();
        let ctx = Context::background();
        let id = PollId::from_ulid(Ulid::new());

        assert!(matches!(repo.fetch(&ctx, &id).await, Err(PollError::NotFound(_))));
        assert!(matches!(repo.delete(&ctx, &id).await, Err(PollError::NotFound(_))));
        assert!(matches!(
            repo.replace(&ctx, &id, yes_no()).await,
            Err(PollError::NotFound(_))
        ));
        assert!(matches!(repo.vote(&ctx, &id, 0).await, Err(PollError::NotFound(_))));
    }

    #[tokio::test]
    async fn deleted_poll_is_gone() {
        let (repo, _) = setup();
        let ctx = Context::background();
        let id = repo.create(&ctx, yes_no()).await.unwrap().uid.unwrap();

        repo.delete(&ctx, &id).await.unwrap();

        assert!(matches!(repo.fetch(&ctx, &id).await, Err(PollError::NotFound(_))));
        assert!(matches!(repo.delete(&ctx, &id).await, Err(PollError::NotFound(_))));
    }
}
