//! Inbound records pushed into the fusion engine by capture collaborators.
//!
//! Payloads arriving over a message channel are parsed into the closed
//! [`FusionMessage`] variant set; anything that does not fit is rejected
//! before it can touch attempt state.

use serde::{Deserialize, Serialize};

use super::attempt::LifecyclePhase;
use crate::domain::errors::WireError;

/// Where a lifecycle hint was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Intercepted fetch/XHR/SSE traffic
    Network,
    /// DOM mutation observer
    Dom,
    /// Page-level API snapshot
    PageSnapshot,
    /// Completion watcher heuristics
    CompletionWatcher,
    /// Operator or test driven
    Manual,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Dom => "dom",
            Self::PageSnapshot => "page_snapshot",
            Self::CompletionWatcher => "completion_watcher",
            Self::Manual => "manual",
        }
    }
}

/// Lifecycle hint for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionSignal {
    pub attempt_id: String,
    pub platform: String,
    pub source: SignalSource,
    pub phase: LifecyclePhase,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_generation_id: Option<String>,
}

impl FusionSignal {
    pub fn new(
        attempt_id: impl Into<String>,
        platform: impl Into<String>,
        source: SignalSource,
        phase: LifecyclePhase,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            platform: platform.into(),
            source,
            phase,
            timestamp_ms,
            conversation_id: None,
            platform_generation_id: None,
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
}

/// Readiness judgment attached to a canonical sample by its parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleReadiness {
    pub ready: bool,
    pub terminal: bool,
    pub reason: String,
    pub content_hash: Option<String>,
    #[serde(default)]
    pub latest_assistant_text_length: u64,
}

impl SampleReadiness {
    /// A terminal, ready judgment over the given content hash.
    pub fn terminal(content_hash: impl Into<String>) -> Self {
        Self {
            ready: true,
            terminal: true,
            reason: "terminal".to_string(),
            content_hash: Some(content_hash.into()),
            latest_assistant_text_length: 0,
        }
    }

    /// A judgment saying generation is still running.
    pub fn in_progress(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            terminal: false,
            reason: reason.into(),
            content_hash: None,
            latest_assistant_text_length: 0,
        }
    }

    /// Ready and terminal: the only shape the stabilization gate will clock.
    pub fn looks_final(&self) -> bool {
        self.ready && self.terminal
    }
}

/// Parsed snapshot from the platform's authoritative data endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalSample {
    pub attempt_id: String,
    pub platform: String,
    pub conversation_id: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub data: serde_json::Value,
    pub readiness: SampleReadiness,
}

impl CanonicalSample {
    pub fn new(
        attempt_id: impl Into<String>,
        platform: impl Into<String>,
        conversation_id: impl Into<String>,
        timestamp_ms: i64,
        readiness: SampleReadiness,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            platform: platform.into(),
            conversation_id: conversation_id.into(),
            timestamp_ms,
            data: serde_json::Value::Null,
            readiness,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Wire envelope carried over the ingestion channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FusionMessage {
    Signal(FusionSignal),
    CanonicalSample(CanonicalSample),
}

impl FusionMessage {
    /// Parse and validate a raw JSON payload.
    pub fn from_json(raw: &str) -> Result<Self, WireError> {
        let message: Self = serde_json::from_str(raw).map_err(|e| WireError::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    /// Parse and validate an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, WireError> {
        let message: Self =
            serde_json::from_value(value).map_err(|e| WireError::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn attempt_id(&self) -> &str {
        match self {
            Self::Signal(signal) => &signal.attempt_id,
            Self::CanonicalSample(sample) => &sample.attempt_id,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Signal(signal) => signal.timestamp_ms,
            Self::CanonicalSample(sample) => sample.timestamp_ms,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signal",
            Self::CanonicalSample(_) => "canonical_sample",
        }
    }

    fn validate(&self) -> Result<(), WireError> {
        let (attempt_id, platform, timestamp_ms) = match self {
            Self::Signal(signal) => (&signal.attempt_id, &signal.platform, signal.timestamp_ms),
            Self::CanonicalSample(sample) => {
                if sample.conversation_id.trim().is_empty() {
                    return Err(WireError::MissingField("conversationId"));
                }
                (&sample.attempt_id, &sample.platform, sample.timestamp_ms)
            }
        };

        if attempt_id.trim().is_empty() {
            return Err(WireError::MissingField("attemptId"));
        }
        if platform.trim().is_empty() {
            return Err(WireError::MissingField("platform"));
        }
        if timestamp_ms < 0 {
            return Err(WireError::InvalidTimestamp(timestamp_ms));
        }
        Ok(())
    }
}

impl From<FusionSignal> for FusionMessage {
    fn from(signal: FusionSignal) -> Self {
        Self::Signal(signal)
    }
}

impl From<CanonicalSample> for FusionMessage {
    fn from(sample: CanonicalSample) -> Self {
        Self::CanonicalSample(sample)
    }
}
