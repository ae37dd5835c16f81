//! MutationGuard port - 変更系操作の前に行う referer チェック
//!
//! add / put / vote の前に呼ばれ、失敗したら Storage には一切触れない。

use crate::context::Context;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("request carries no referer")]
    MissingReferer,

    #[error("referer {0:?} is not allowed")]
    RefererNotAllowed(String),
}

pub trait MutationGuard: Send + Sync {
    fn check(&self, ctx: &Context) -> Result<(), GuardError>;
}

/// すべて通す（開発用）
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl MutationGuard for AllowAll {
    fn check(&self, _ctx: &Context) -> Result<(), GuardError> {
        Ok(())
    }
}

/// Accepts requests whose referer starts with one of the configured prefixes.
#[derive(Debug, Clone, Default)]
pub struct RefererAllowList {
    prefixes: Vec<String>,
}

impl RefererAllowList {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl MutationGuard for RefererAllowList {
    fn check(&self, ctx: &Context) -> Result<(), GuardError> {
        let referer = ctx.referer().ok_or(GuardError::MissingReferer)?;
        if self.prefixes.iter().any(|p| referer.starts_with(p.as_str())) {
            Ok(())
        } else {
            Err(GuardError::RefererNotAllowed(referer.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::exact("https://polls.example.com/", true)]
    #[case::path("https://polls.example.com/admin/new", true)]
    #[case::other_host("https://evil.example.net/", false)]
    fn allow_list_matches_prefix(#[case] referer: &str, #[case] allowed: bool) {
        let guard = RefererAllowList::new(["https://polls.example.com/"]);
        let ctx = Context::background().with_referer(referer);
        assert_eq!(guard.check(&ctx).is_ok(), allowed);
    }

    #[test]
    fn allow_list_requires_referer() {
        let guard = RefererAllowList::new(["https://polls.example.com/"]);
        assert_eq!(
            guard.check(&Context::background()),
            Err(GuardError::MissingReferer)
        );
    }

    #[test]
    fn allow_all_ignores_referer() {
        assert!(AllowAll.check(&Context::background()).is_ok());
    }
}
