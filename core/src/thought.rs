//! The thought row: the unit of work flowing through the pipeline.
//!
//! A thought is owned by the persistence sink once a delivery begins; all
//! status transitions go through [`crate::sink::ThoughtStore`], which is the
//! sole place the status machine is enforced.

use crate::stages::StageOutputs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted thought text length, in characters.
pub const MAX_TEXT_CHARS: usize = 4000;

/// Opaque unique identifier of a thought.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThoughtId(pub Uuid);

impl ThoughtId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThoughtId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThoughtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque user identifier. Also the broker partitioning key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap a raw user id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a thought.
///
/// Transitions are monotonic: `pending → processing → {completed | failed}`.
/// The recovery sweeper may move `failed` back to `pending` while the attempt
/// counter is below the delivery budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtStatus {
    /// Accepted by ingest, not yet picked up by a worker.
    Pending,
    /// A delivery is (or was, see the stuck grace window) working on it.
    Processing,
    /// All five stage outputs are persisted.
    Completed,
    /// Terminally failed; see the failure record.
    Failed,
}

impl ThoughtStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`StatusParseError`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, StatusParseError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StatusParseError(s.to_string())),
        }
    }

    /// Whether this status is terminal (`completed` or `failed`).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognized status string was read from storage.
#[derive(Debug, Error)]
#[error("invalid thought status: {0}")]
pub struct StatusParseError(pub String);

/// Last error recorded on a failed thought.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stable taxonomy kind, e.g. `permanent/unknown_user`.
    pub kind: String,
    /// Informational message. Never contains LLM response content.
    pub message: String,
}

/// A thought row as read from the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique id.
    pub id: ThoughtId,
    /// Owning user; broker partitioning key.
    pub user_id: UserId,
    /// The submitted text (1..=[`MAX_TEXT_CHARS`] chars).
    pub text: String,
    /// Current lifecycle status.
    pub status: ThoughtStatus,
    /// Number of deliveries that began processing this thought.
    pub attempt_count: i32,
    /// Stage outputs persisted so far.
    pub outputs: StageOutputs,
    /// Embedding of `text`, present after a successful run's cache step.
    pub embedding: Option<Vec<f32>>,
    /// User-context version the last run observed, if any.
    pub context_version: Option<i64>,
    /// When the thought was ingested.
    pub created_at: DateTime<Utc>,
    /// When the most recent delivery began processing.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Set on the terminal transition.
    pub processed_at: Option<DateTime<Utc>>,
    /// Present only when `status == Failed`.
    pub failure: Option<FailureRecord>,
}

/// Fields required to ingest a new thought.
#[derive(Clone, Debug)]
pub struct NewThought {
    /// Pre-generated id so ingest can return it immediately.
    pub id: ThoughtId,
    /// Owning user.
    pub user_id: UserId,
    /// Submitted text; must already be length-validated.
    pub text: String,
}

/// Validate submitted thought text against the documented bounds.
///
/// # Errors
///
/// Returns [`TextError`] when the text is empty or longer than
/// [`MAX_TEXT_CHARS`] characters.
pub fn validate_text(text: &str) -> Result<(), TextError> {
    let chars = text.chars().count();
    if chars == 0 {
        return Err(TextError::Empty);
    }
    if chars > MAX_TEXT_CHARS {
        return Err(TextError::TooLong { chars });
    }
    Ok(())
}

/// Rejected thought text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
    /// The text was empty.
    #[error("thought text is empty")]
    Empty,
    /// The text exceeded [`MAX_TEXT_CHARS`] characters.
    #[error("thought text is {chars} chars, max {MAX_TEXT_CHARS}")]
    TooLong {
        /// Observed character count.
        chars: usize,
    },
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            ThoughtStatus::Pending,
            ThoughtStatus::Processing,
            ThoughtStatus::Completed,
            ThoughtStatus::Failed,
        ] {
            let parsed = ThoughtStatus::parse(status.as_str()).expect("valid status");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn status_invalid() {
        assert!(ThoughtStatus::parse("archived").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ThoughtStatus::Pending.is_terminal());
        assert!(!ThoughtStatus::Processing.is_terminal());
        assert!(ThoughtStatus::Completed.is_terminal());
        assert!(ThoughtStatus::Failed.is_terminal());
    }

    #[test]
    fn text_bounds() {
        assert_eq!(validate_text(""), Err(TextError::Empty));
        assert_eq!(validate_text("x"), Ok(()));
        let max = "y".repeat(MAX_TEXT_CHARS);
        assert_eq!(validate_text(&max), Ok(()));
        let over = "y".repeat(MAX_TEXT_CHARS + 1);
        assert!(matches!(
            validate_text(&over),
            Err(TextError::TooLong { chars }) if chars == MAX_TEXT_CHARS + 1
        ));
    }

    #[test]
    fn multibyte_text_counts_chars_not_bytes() {
        let text = "é".repeat(MAX_TEXT_CHARS);
        assert_eq!(validate_text(&text), Ok(()));
    }
}
