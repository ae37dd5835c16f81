//! Stored shape of a Poll.
//!
//! uid はレコード本体には持たず、key から復元する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Answer, IdMarker, Poll, PollError, PollId, ids::PollEntity};
use crate::ports::{Key, Record, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct PollRecord {
    question: String,
    answers: Vec<Answer>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

pub(crate) fn poll_kind() -> &'static str {
    PollEntity::kind()
}

pub(crate) fn poll_key(id: &PollId) -> Key {
    Key::new(poll_kind(), id.as_ulid())
}

/// Recovers the poll id from a key returned by storage.
pub(crate) fn poll_id(key: &Key) -> Result<PollId, StoreError> {
    if key.kind() != poll_kind() {
        return Err(StoreError::InvalidKey(format!("{key} is not a poll key")));
    }
    key.id()
        .map(PollId::from_ulid)
        .ok_or_else(|| StoreError::InvalidKey(format!("incomplete key {key}")))
}

pub(crate) fn encode(poll: &Poll) -> Result<Record, StoreError> {
    let record = PollRecord {
        question: poll.question.clone(),
        answers: poll.answers.clone(),
        created: poll.created,
        updated: poll.updated,
    };
    serde_json::to_value(record).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn decode(record: Record, id: PollId) -> Result<Poll, PollError> {
    let stored: PollRecord = serde_json::from_value(record).map_err(|e| {
        tracing::error!(poll = %id, error = %e, "stored poll does not decode");
        PollError::Storage(StoreError::Corrupt(e.to_string()))
    })?;
    Ok(Poll {
        uid: Some(id),
        question: stored.question,
        answers: stored.answers,
        created: stored.created,
        updated: stored.updated,
    })
}
