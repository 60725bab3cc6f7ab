//! Capture attempt domain model.
//!
//! An attempt is one user prompt -> assistant response cycle that is being
//! tracked for capture. Its lifecycle is a directed phase graph; anything
//! off the graph is treated as a stale or out-of-order hint and ignored.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a capture attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Attempt created, no signal processed yet
    #[default]
    Idle,
    /// User prompt observed sent
    PromptSent,
    /// Generation in progress
    Streaming,
    /// A non-canonical "looks done" signal was seen
    CompletedHint,
    /// A canonical sample is being stabilized
    CanonicalProbing,
    /// Two stabilized canonical samples agree
    CapturedReady,
    /// Generation ended without reaching ready
    TerminatedPartial,
    /// Unrecoverable failure
    Error,
    /// A newer attempt took over the conversation
    Superseded,
    /// Explicitly torn down
    Disposed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PromptSent => "prompt_sent",
            Self::Streaming => "streaming",
            Self::CompletedHint => "completed_hint",
            Self::CanonicalProbing => "canonical_probing",
            Self::CapturedReady => "captured_ready",
            Self::TerminatedPartial => "terminated_partial",
            Self::Error => "error",
            Self::Superseded => "superseded",
            Self::Disposed => "disposed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "prompt_sent" => Some(Self::PromptSent),
            "streaming" => Some(Self::Streaming),
            "completed_hint" => Some(Self::CompletedHint),
            "canonical_probing" => Some(Self::CanonicalProbing),
            "captured_ready" => Some(Self::CapturedReady),
            "terminated_partial" => Some(Self::TerminatedPartial),
            "error" => Some(Self::Error),
            "superseded" => Some(Self::Superseded),
            "disposed" => Some(Self::Disposed),
            _ => None,
        }
    }

    /// Phases the attempt may legally move to from this one.
    pub fn valid_transitions(&self) -> &'static [LifecyclePhase] {
        use LifecyclePhase::*;
        match self {
            Idle => &[PromptSent, Streaming, CompletedHint, CanonicalProbing],
            PromptSent => &[Streaming, CompletedHint, CanonicalProbing, Superseded, Disposed],
            Streaming => &[
                CompletedHint,
                CanonicalProbing,
                TerminatedPartial,
                Error,
                Superseded,
                Disposed,
            ],
            CompletedHint => &[CanonicalProbing, TerminatedPartial, Superseded, Disposed],
            CanonicalProbing => &[CapturedReady, TerminatedPartial, Error, Superseded, Disposed],
            CapturedReady => &[Superseded, Disposed],
            TerminatedPartial => &[Disposed],
            Error => &[Disposed],
            Superseded => &[Disposed],
            Disposed => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// A transition absent from the table, including a self-transition.
    pub fn is_regressive(&self, next: Self) -> bool {
        !self.can_transition_to(next)
    }

    /// Terminal phases: no further progress is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CapturedReady
                | Self::TerminatedPartial
                | Self::Error
                | Self::Superseded
                | Self::Disposed
        )
    }

    /// Phases left alone by a route change: the attempt already has an outcome.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::CapturedReady | Self::Error | Self::TerminatedPartial | Self::Superseded
        )
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping record for one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptDescriptor {
    pub attempt_id: String,
    pub platform: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub conversation_id: Option<String>,
    pub platform_generation_id: Option<String>,
    pub phase: LifecyclePhase,
    pub disposed: bool,
    pub superseded_by_attempt_id: Option<String>,
}

impl AttemptDescriptor {
    /// Create a fresh idle descriptor.
    pub fn new(attempt_id: impl Into<String>, platform: impl Into<String>, now_ms: i64) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            platform: platform.into(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            conversation_id: None,
            platform_generation_id: None,
            phase: LifecyclePhase::Idle,
            disposed: false,
            superseded_by_attempt_id: None,
        }
    }

    /// Advance `updated_at_ms`, never moving it backwards.
    pub fn touch(&mut self, timestamp_ms: i64) {
        if timestamp_ms > self.updated_at_ms {
            self.updated_at_ms = timestamp_ms;
        }
    }

    /// Eligible for eviction by size or TTL sweeps.
    pub fn is_evictable(&self) -> bool {
        self.disposed || self.phase.is_settled()
    }
}

/// Input for creating (or looking up) an attempt.
#[derive(Debug, Clone, Default)]
pub struct CreateAttemptInput {
    pub attempt_id: String,
    pub platform: String,
    pub conversation_id: Option<String>,
    pub platform_generation_id: Option<String>,
    pub timestamp_ms: Option<i64>,
}

impl CreateAttemptInput {
    pub fn new(attempt_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            platform: platform.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_generation(mut self, generation_id: impl Into<String>) -> Self {
        self.platform_generation_id = Some(generation_id.into());
        self
    }

    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}
