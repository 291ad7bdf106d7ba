//! The error taxonomy driving retry and dead-letter decisions.
//!
//! Every failure that crosses a component boundary is classified as either
//! *transient* (the broker may redeliver) or *permanent* (terminal `failed`
//! state plus a dead-letter entry). Cache-internal errors never appear here:
//! they are swallowed at the cache boundary and downgraded to a miss.

use std::fmt;
use thiserror::Error;

/// Failure kinds the relevant layer will retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransientKind {
    /// Connection-level network failure.
    Network,
    /// An operation exceeded its timeout.
    Timeout,
    /// The provider rate-limited us.
    RateLimited,
    /// Another delivery currently owns the thought row.
    InProgress,
    /// A stage output failed validation and will be re-prompted.
    ValidationRetry,
}

impl TransientKind {
    /// Stable `transient/...` wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "transient/network",
            Self::Timeout => "transient/timeout",
            Self::RateLimited => "transient/rate_limited",
            Self::InProgress => "transient/in_progress",
            Self::ValidationRetry => "transient/validation_retry",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure kinds that are never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PermanentKind {
    /// No user context exists for the thought's user.
    UnknownUser,
    /// The work order itself was malformed.
    InvalidPayload,
    /// The provider reported quota exhaustion as terminal.
    QuotaExhausted,
    /// The provider refused on content-policy grounds.
    ContentPolicy,
    /// A sink invariant was violated (e.g. completing with missing stages).
    Invariant,
    /// The recovery sweeper gave up on a stuck thought.
    Stuck,
}

impl PermanentKind {
    /// Stable `permanent/...` wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownUser => "permanent/unknown_user",
            Self::InvalidPayload => "permanent/invalid_payload",
            Self::QuotaExhausted => "permanent/quota_exhausted",
            Self::ContentPolicy => "permanent/content_policy",
            Self::Invariant => "permanent/invariant",
            Self::Stuck => "permanent/stuck",
        }
    }
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure.
///
/// The message is informational and must never contain content from an LLM
/// response; the kind string is stable and suitable for UI mapping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Retryable by the broker (redelivery) or the owning layer.
    #[error("{} ({message})", .kind.as_str())]
    Transient {
        /// Taxonomy kind.
        kind: TransientKind,
        /// Informational message.
        message: String,
    },
    /// Terminal; goes to the sink as `failed` and (usually) to the DLQ.
    #[error("{} ({message})", .kind.as_str())]
    Permanent {
        /// Taxonomy kind.
        kind: PermanentKind,
        /// Informational message.
        message: String,
    },
}

impl PipelineError {
    /// Construct a transient failure.
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    /// Construct a permanent failure.
    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            kind,
            message: message.into(),
        }
    }

    /// Whether the broker should redeliver.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// The stable taxonomy string, e.g. `transient/timeout`.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Transient { kind, .. } => kind.as_str(),
            Self::Permanent { kind, .. } => kind.as_str(),
        }
    }

    /// The informational message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(TransientKind::Timeout.as_str(), "transient/timeout");
        assert_eq!(TransientKind::InProgress.as_str(), "transient/in_progress");
        assert_eq!(PermanentKind::UnknownUser.as_str(), "permanent/unknown_user");
        assert_eq!(PermanentKind::Stuck.as_str(), "permanent/stuck");
    }

    #[test]
    fn classification() {
        let transient = PipelineError::transient(TransientKind::Network, "connection reset");
        assert!(transient.is_transient());
        assert_eq!(transient.kind_str(), "transient/network");

        let permanent = PipelineError::permanent(PermanentKind::ContentPolicy, "refused");
        assert!(!permanent.is_transient());
        assert_eq!(permanent.kind_str(), "permanent/content_policy");
        assert_eq!(permanent.message(), "refused");
    }
}
