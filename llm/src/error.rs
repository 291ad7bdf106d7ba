//! Provider error type and its mapping onto the pipeline taxonomy.

use thiserror::Error;
use thoughtflow_core::error::{PermanentKind, TransientKind};

/// Errors from chat-completion and embedding providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key in config or the provider's environment variable.
    #[error("missing API key for provider '{0}'")]
    MissingApiKey(String),

    /// Connection-level failure.
    #[error("provider request failed: {0}")]
    Network(String),

    /// The request exceeded its timeout.
    #[error("provider request timed out: {0}")]
    Timeout(String),

    /// HTTP 429.
    #[error("provider rate limited the request")]
    RateLimited,

    /// HTTP 401/403: bad or revoked credentials.
    #[error("provider rejected the credentials")]
    Unauthorized,

    /// The provider refused the request on content-policy grounds.
    #[error("provider refused on content policy: {0}")]
    ContentPolicy(String),

    /// The account is out of quota and the provider reports it as terminal.
    #[error("provider quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Any other API error.
    #[error("provider API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("provider response parse failed: {0}")]
    Parse(String),
}

/// Pipeline-taxonomy classification of a provider error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry within the stage, then bubble as `transient_fail`.
    Transient(TransientKind),
    /// Bubble immediately as `permanent_fail`.
    Permanent(PermanentKind),
}

impl LlmError {
    /// Map onto the stage failure taxonomy.
    ///
    /// Authentication failures are classified as `permanent/quota_exhausted`:
    /// like exhausted quota they are account-level, terminal, and fixed
    /// only by operator action.
    #[must_use]
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Transient(TransientKind::Network),
            Self::Timeout(_) => ErrorClass::Transient(TransientKind::Timeout),
            Self::RateLimited => ErrorClass::Transient(TransientKind::RateLimited),
            Self::Parse(_) => ErrorClass::Transient(TransientKind::ValidationRetry),
            Self::Api { status, .. } if *status >= 500 => {
                ErrorClass::Transient(TransientKind::Network)
            }
            Self::ContentPolicy(_) => ErrorClass::Permanent(PermanentKind::ContentPolicy),
            Self::QuotaExhausted(_) | Self::Unauthorized | Self::MissingApiKey(_) => {
                ErrorClass::Permanent(PermanentKind::QuotaExhausted)
            }
            Self::Api { .. } => ErrorClass::Permanent(PermanentKind::InvalidPayload),
        }
    }

    /// Build from a `reqwest` transport error.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
