//! PollService - ルート表の各操作に対応する入口
//!
//! 入力はトランスポートから来たままの形（文字列の uid、符号付き index、
//! 任意の limit / cursor）で受け、ここでドメイン型に変換する。
//!
//! # 順序
//! 1. 変更系（add / put / vote）は guard を先に通す。拒否なら Storage に触れない
//! 2. 入力の変換（uid / limit / cursor / answer）
//! 3. repository / lister に委譲

use std::sync::Arc;

use crate::config::ListLimits;
use crate::context::Context;
use crate::domain::{ListPage, Poll, PollDraft, PollError, PollId, QueryMarker};
use crate::ports::{Clock, MutationGuard, Storage};

use super::listing::PollLister;
use super::repository::PollRepository;
use super::routes::Operation;

pub struct PollService<S: ?Sized, C> {
    repo: PollRepository<S, C>,
    lister: PollLister<S>,
    guard: Arc<dyn MutationGuard>,
    limits: ListLimits,
}

impl<S, C> PollService<S, C>
where
    S: Storage + ?Sized,
    C: Clock,
{
    pub fn new(
        repo: PollRepository<S, C>,
        lister: PollLister<S>,
        guard: Arc<dyn MutationGuard>,
        limits: ListLimits,
    ) -> Self {
        Self {
            repo,
            lister,
            guard,
            limits,
        }
    }

    pub fn limits(&self) -> &ListLimits {
        &self.limits
    }

    fn check(&self, ctx: &Context, op: Operation) -> Result<(), PollError> {
        if !op.guarded() {
            return Ok(());
        }
        self.guard.check(ctx).map_err(|err| {
            tracing::warn!(operation = ?op, error = %err, "mutation rejected by guard");
            PollError::Forbidden(err)
        })
    }

    pub async fn list(
        &self,
        ctx: &Context,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<ListPage, PollError> {
        self.check(ctx, Operation::List)?;
        let limit = self.limits.resolve(limit)?;
        let after = cursor.map(QueryMarker::decode).transpose()?;
        self.lister.list(ctx, limit, after.as_ref()).await
    }

    pub async fn add(&self, ctx: &Context, draft: PollDraft) -> Result<Poll, PollError> {
        self.check(ctx, Operation::Add)?;
        self.repo.create(ctx, draft).await
    }

    pub async fn get(&self, ctx: &Context, uid: &str) -> Result<Poll, PollError> {
        self.check(ctx, Operation::Get)?;
        let id = parse_uid(uid)?;
        self.repo.fetch(ctx, &id).await
    }

    pub async fn put(&self, ctx: &Context, uid: &str, draft: PollDraft) -> Result<Poll, PollError> {
        self.check(ctx, Operation::Put)?;
        let id = parse_uid(uid)?;
        self.repo.replace(ctx, &id, draft).await
    }

    pub async fn delete(&self, ctx: &Context, uid: &str) -> Result<(), PollError> {
        self.check(ctx, Operation::Delete)?;
        let id = parse_uid(uid)?;
        self.repo.delete(ctx, &id).await
    }

    pub async fn vote(&self, ctx: &Context, uid: &str, answer: i64) -> Result<(), PollError> {
        self.check(ctx, Operation::Vote)?;
        let id = parse_uid(uid)?;
        let index = usize::try_from(answer).map_err(|_| PollError::IndexOutOfRange(answer))?;
        self.repo.vote(ctx, &id, index).await
    }
}

fn parse_uid(uid: &str) -> Result<PollId, PollError> {
    Ok(uid.trim().parse::<PollId>()?)
}
