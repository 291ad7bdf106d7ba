//! Wire-level event envelope shared by the broker and the fan-out bus.
//!
//! Canonical JSON, UTF-8, internally tagged on `event_type`, versioned via
//! `schema_version`. The same encoding is used on the work topic, the
//! dead-letter topic and the per-user fan-out channels; there is no schema
//! translation between transports.

use crate::stages::StageName;
use crate::thought::{ThoughtId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The only envelope schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Variant payloads, tagged with `event_type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A new thought was accepted; the work order for the pipeline.
    ThoughtCreated {
        /// The submitted text.
        text: String,
        /// Optional caller-supplied priority hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority_hint: Option<String>,
    },
    /// A delivery began processing the thought.
    ThoughtProcessing,
    /// One agent stage finished.
    ThoughtAgentCompleted {
        /// Snake-case stage name.
        agent_name: String,
        /// 1-based stage number.
        agent_number: u8,
        /// Always 5.
        total_agents: u8,
        /// Progress in `[0, 100]`.
        progress_percent: u8,
        /// The stage output, omitted when large.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_output: Option<serde_json::Value>,
    },
    /// The pipeline finished successfully.
    ThoughtCompleted {
        /// Wall-clock duration of the run.
        processing_time_seconds: f64,
        /// Whether the semantic cache short-circuited the run.
        cache_hit: bool,
    },
    /// The pipeline failed terminally.
    ThoughtFailed {
        /// Stable taxonomy kind, e.g. `permanent/unknown_user`.
        error_kind: String,
        /// Informational message; never LLM response content.
        error_message: String,
        /// Deliveries attempted so far.
        retry_count: i32,
    },
}

impl EventPayload {
    /// Build a `ThoughtAgentCompleted` payload for a finished stage.
    #[must_use]
    pub fn agent_completed(stage: StageName, agent_output: Option<serde_json::Value>) -> Self {
        Self::ThoughtAgentCompleted {
            agent_name: stage.as_str().to_string(),
            agent_number: stage.number(),
            total_agents: StageName::COUNT,
            progress_percent: stage.progress_percent(),
            agent_output,
        }
    }

    /// Wire name of the variant.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ThoughtCreated { .. } => "thought_created",
            Self::ThoughtProcessing => "thought_processing",
            Self::ThoughtAgentCompleted { .. } => "thought_agent_completed",
            Self::ThoughtCompleted { .. } => "thought_completed",
            Self::ThoughtFailed { .. } => "thought_failed",
        }
    }
}

/// A versioned event with its routing identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique id of this event.
    pub event_id: Uuid,
    /// Envelope schema version; see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// The thought this event is about.
    pub thought_id: ThoughtId,
    /// The owning user; also the broker partitioning key.
    pub user_id: UserId,
    /// The tagged variant payload, flattened into the envelope object.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Build a fresh envelope with a random `event_id` and the current
    /// schema version.
    #[must_use]
    pub fn new(
        thought_id: ThoughtId,
        user_id: UserId,
        occurred_at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            occurred_at,
            thought_id,
            user_id,
            payload,
        }
    }

    /// Encode to canonical JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode from JSON bytes, rejecting unknown schema versions.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] for malformed JSON and
    /// [`EnvelopeError::UnsupportedSchema`] for a version this build does
    /// not understand. Both are dead-letter conditions for a consumer.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedSchema {
                found: envelope.schema_version,
            });
        }
        Ok(envelope)
    }
}

/// Envelope codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Serialization failed.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    /// The bytes were not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(String),
    /// The envelope declared a schema version this build does not know.
    #[error("unsupported envelope schema version {found}, expected {SCHEMA_VERSION}")]
    UnsupportedSchema {
        /// The declared version.
        found: u32,
    },
}
