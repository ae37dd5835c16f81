//! End-to-end poll lifecycle over the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use rstest::rstest;
use tally_core::app::{PollService, ServiceBuilder};
use tally_core::config::ServiceConfig;
use tally_core::context::Context;
use tally_core::domain::{ErrorKind, PollDraft, PollError, PollId, PollValidationError};
use tally_core::impls::InMemoryStore;
use tally_core::ports::{FixedClock, RefererAllowList, StoreError, SystemClock};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tally_core=debug")
        .with_test_writer()
        .try_init();
}

fn service() -> PollService<InMemoryStore, SystemClock> {
    init_logging();
    ServiceBuilder::new(ServiceConfig::default())
        .build_in_memory()
        .unwrap()
}

fn missing_uid() -> String {
    PollId::from_ulid(ulid::Ulid::new()).to_string()
}

#[rstest]
#[case::empty_question(PollDraft::new("", ["Yes"]), PollValidationError::EmptyQuestion)]
#[case::blank_question(PollDraft::new("   ", ["Yes"]), PollValidationError::EmptyQuestion)]
#[case::no_answers(PollDraft::new("Q?", Vec::<String>::new()), PollValidationError::NoAnswers)]
#[case::blank_answer(PollDraft::new("Q?", ["Yes", ""]), PollValidationError::EmptyAnswer { index: 1 })]
#[tokio::test]
async fn invalid_drafts_are_rejected(#[case] draft: PollDraft, #[case] expected: PollValidationError) {
    let service = service();
    let ctx = Context::background();

    let err = service.add(&ctx, draft).await.unwrap_err();

    assert!(matches!(err, PollError::Validation(ref got) if *got == expected));
    assert_eq!(err.kind().http_status(), 400);
    let page = service.list(&ctx, None, None).await.unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn replace_rejects_invalid_draft_before_lookup() {
    let service = service();
    let err = service
        .put(&Context::background(), &missing_uid(), PollDraft::new("", ["a"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_are_all_counted() {
    const VOTERS: usize = 64;

    let service = Arc::new(service());
    let ctx = Context::background();
    let poll = service
        .add(&ctx, PollDraft::new("Best color?", ["Red", "Green", "Blue"]))
        .await
        .unwrap();
    let uid = poll.uid.unwrap().to_string();

    let mut handles = Vec::new();
    for voter in 0..VOTERS {
        let service = service.clone();
        let ctx = ctx.clone();
        let uid = uid.clone();
        handles.push(tokio::spawn(async move {
            service.vote(&ctx, &uid, (voter % 3) as i64).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let after = service.get(&ctx, &uid).await.unwrap();
    assert_eq!(after.total_votes(), VOTERS as u64);
    assert_eq!(after.answers[0].votes, 22);
    assert_eq!(after.answers[1].votes, 21);
    assert_eq!(after.answers[2].votes, 21);
}

#[rstest]
#[case::past_end(2)]
#[case::far_past_end(99)]
#[case::negative(-1)]
#[tokio::test]
async fn out_of_range_vote_changes_nothing(#[case] answer: i64) {
    let service = service();
    let ctx = Context::background();
    let poll = service
        .add(&ctx, PollDraft::new("Q?", ["Yes", "No"]))
        .await
        .unwrap();
    let uid = poll.uid.unwrap().to_string();
    service.vote(&ctx, &uid, 0).await.unwrap();

    let err = service.vote(&ctx, &uid, answer).await.unwrap_err();

    assert!(matches!(err, PollError::IndexOutOfRange(got) if got == answer));
    let after = service.get(&ctx, &uid).await.unwrap();
    assert_eq!(after.answers[0].votes, 1);
    assert_eq!(after.answers[1].votes, 0);
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let service = service();
    let ctx = Context::background();
    let uid = missing_uid();
    let draft = PollDraft::new("Q?", ["Yes"]);

    assert_eq!(service.get(&ctx, &uid).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(service.delete(&ctx, &uid).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        service.put(&ctx, &uid, draft.clone()).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(service.vote(&ctx, &uid, 0).await.unwrap_err().kind(), ErrorKind::NotFound);

    for bad in ["", "poll-", "nope", "poll-zzzz"] {
        assert_eq!(service.get(&ctx, bad).await.unwrap_err().kind(), ErrorKind::InvalidKey);
    }
}

#[tokio::test]
async fn limit_one_pages_visit_every_poll_once() {
    const POLLS: usize = 7;

    let service = service();
    let ctx = Context::background();
    let mut created = Vec::new();
    for i in 0..POLLS {
        let poll = service
            .add(&ctx, PollDraft::new(format!("Q{i}"), ["a", "b"]))
            .await
            .unwrap();
        created.push(poll.uid.unwrap());
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = service.list(&ctx, Some(1), cursor.as_deref()).await.unwrap();
        assert!(page.polls.len() <= 1);
        if page.is_empty() {
            assert!(page.next.is_some());
            break;
        }
        let next = page.next.expect("next is always present");
        seen.extend(page.polls.into_iter().map(|p| p.uid.unwrap()));
        cursor = Some(next.encode());
    }

    // 採番順 = 一覧順、重複なし
    assert_eq!(seen, created);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), POLLS);
}

#[tokio::test]
async fn empty_listing_and_default_limit() {
    let service = service();
    let ctx = Context::background();

    let empty = service.list(&ctx, None, None).await.unwrap();
    assert!(empty.is_empty());
    assert!(empty.next.is_some());

    for i in 0..12 {
        service
            .add(&ctx, PollDraft::new(format!("Q{i}"), ["a"]))
            .await
            .unwrap();
    }
    let first = service.list(&ctx, None, None).await.unwrap();
    assert_eq!(first.polls.len(), 10);

    let token = first.next.unwrap().encode();
    let rest = service.list(&ctx, None, Some(&token)).await.unwrap();
    assert_eq!(rest.polls.len(), 2);
}

#[tokio::test]
async fn replace_keeps_uid_and_created() {
    init_logging();
    let t0 = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let clock = FixedClock::new(t0);
    let service = ServiceBuilder::new(ServiceConfig::default())
        .clock(clock.clone())
        .build_in_memory()
        .unwrap();
    let ctx = Context::background();

    let poll = service
        .add(&ctx, PollDraft::new("Lunch?", ["Pizza", "Sushi"]))
        .await
        .unwrap();
    let uid = poll.uid.unwrap().to_string();
    service.vote(&ctx, &uid, 1).await.unwrap();

    clock.advance(chrono::Duration::hours(1));
    let replaced = service
        .put(&ctx, &uid, PollDraft::new("Dinner?", ["Sushi", "Ramen"]))
        .await
        .unwrap();

    assert_eq!(replaced.uid, poll.uid);
    assert_eq!(replaced.created, t0);
    assert_eq!(replaced.updated, t0 + chrono::Duration::hours(1));
    assert_eq!(replaced.question, "Dinner?");
    // 同じテキストの answer は票を引き継ぐ
    assert_eq!(replaced.answers[0].votes, 1);
    assert_eq!(replaced.answers[1].votes, 0);
    assert_eq!(service.get(&ctx, &uid).await.unwrap(), replaced);
}

#[tokio::test]
async fn deadline_surfaces_as_storage_error() {
    init_logging();
    let store = Arc::new(InMemoryStore::new().with_latency(Duration::from_millis(500)));
    let service = ServiceBuilder::new(ServiceConfig::default())
        .build_with(store)
        .unwrap();
    let ctx = Context::background().with_timeout(Duration::from_millis(20));

    let err = service
        .add(&ctx, PollDraft::new("Q?", ["Yes"]))
        .await
        .unwrap_err();

    assert!(matches!(err, PollError::Storage(StoreError::DeadlineExceeded)));
    assert_eq!(err.kind().http_status(), 500);
}

#[tokio::test]
async fn cancelled_context_surfaces_as_storage_error() {
    let service = service();
    let ctx = Context::background();
    ctx.cancel();

    let err = service.list(&ctx, None, None).await.unwrap_err();
    assert!(matches!(err, PollError::Storage(StoreError::Cancelled)));
}

#[tokio::test]
async fn guard_rejection_touches_no_storage() {
    init_logging();
    let store = Arc::new(InMemoryStore::new());
    let service = ServiceBuilder::new(ServiceConfig::default())
        .guard(RefererAllowList::new(["https://polls.example.com/"]))
        .build_with(store.clone())
        .unwrap();

    let allowed = Context::background().with_referer("https://polls.example.com/admin");
    let poll = service
        .add(&allowed, PollDraft::new("Q?", ["Yes", "No"]))
        .await
        .unwrap();
    let uid = poll.uid.unwrap().to_string();

    let anonymous = Context::background();
    let draft = PollDraft::new("Hijacked", ["x"]);
    assert_eq!(
        service.add(&anonymous, draft.clone()).await.unwrap_err().kind(),
        ErrorKind::Forbidden
    );
    assert_eq!(
        service.put(&anonymous, &uid, draft).await.unwrap_err().kind(),
        ErrorKind::Forbidden
    );
    assert_eq!(
        service.vote(&anonymous, &uid, 0).await.unwrap_err().kind(),
        ErrorKind::Forbidden
    );

    assert_eq!(store.count("Poll").await, 1);
    let after = service.get(&anonymous, &uid).await.unwrap();
    assert_eq!(after, poll);
}
