//! Poll model: question + ordered answers + vote counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PollId;

/// One answer option of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,

    /// Only the vote operation increments this.
    #[serde(default)]
    pub votes: u64,
}

impl Answer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            votes: 0,
        }
    }
}

/// Caller input for create / replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDraft {
    pub question: String,
    pub answers: Vec<String>,
}

impl PollDraft {
    pub fn new<I, A>(question: impl Into<String>, answers: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            question: question.into(),
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

/// A poll.
///
/// `uid` は永続化前は `None`。Storage が採番した後は変わらない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<PollId>,
    pub question: String,
    pub answers: Vec<Answer>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollValidationError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("a poll needs at least one answer")]
    NoAnswers,

    #[error("answer {index} must not be empty")]
    EmptyAnswer { index: usize },
}

impl Poll {
    /// Builds an unsaved poll with all counters at zero and `created == updated == now`.
    pub fn from_draft(draft: PollDraft, now: DateTime<Utc>) -> Self {
        Self {
            uid: None,
            question: draft.question,
            answers: draft.answers.into_iter().map(Answer::new).collect(),
            created: now,
            updated: now,
        }
    }

    pub fn validate(&self) -> Result<(), PollValidationError> {
        if self.question.trim().is_empty() {
            return Err(PollValidationError::EmptyQuestion);
        }
        if self.answers.is_empty() {
            return Err(PollValidationError::NoAnswers);
        }
        if let Some(index) = self.answers.iter().position(|a| a.text.trim().is_empty()) {
            return Err(PollValidationError::EmptyAnswer { index });
        }
        Ok(())
    }

    /// Replaces question and answers in place.
    ///
    /// Counters survive for answer texts that already existed (first match wins);
    /// new texts start at zero. `uid` and `created` are untouched.
    pub fn apply_draft(&mut self, draft: PollDraft, now: DateTime<Utc>) {
        let mut previous = std::mem::take(&mut self.answers);
        self.answers = draft
            .answers
            .into_iter()
            .map(|text| {
                let votes = previous
                    .iter()
                    .position(|a| a.text == text)
                    .map(|i| previous.swap_remove(i).votes)
                    .unwrap_or(0);
                Answer { text, votes }
            })
            .collect();
        self.question = draft.question;
        self.updated = now;
    }

    /// Adds one vote to `answer`. Returns `false` (and changes nothing) when
    /// the index is out of range.
    pub fn record_vote(&mut self, answer: usize, now: DateTime<Utc>) -> bool {
        match self.answers.get_mut(answer) {
            Some(a) => {
                a.votes += 1;
                self.updated = now;
                true
            }
            None => false,
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.answers.iter().map(|a| a.votes).sum()
    }
}
