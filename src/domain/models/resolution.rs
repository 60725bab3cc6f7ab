//! Capture resolution: the queryable verdict on whether an attempt is safe to export.

use serde::{Deserialize, Serialize};

use super::attempt::{AttemptDescriptor, LifecyclePhase};

/// Why a resolution is (or is not) ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    Captured,
    NotCaptured,
    AwaitingCanonical,
    Stabilizing,
    StabilizationTimeout,
    CanonicalNotReady,
    TerminatedPartial,
    Failed,
    Superseded,
    Disposed,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "captured",
            Self::NotCaptured => "not_captured",
            Self::AwaitingCanonical => "awaiting_canonical",
            Self::Stabilizing => "stabilizing",
            Self::StabilizationTimeout => "stabilization_timeout",
            Self::CanonicalNotReady => "canonical_not_ready",
            Self::TerminatedPartial => "terminated_partial",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition currently keeping an attempt from being ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingCondition {
    NoCanonicalData,
    AwaitingSecondSample,
    StabilizationTimeout,
    CanonicalNotReady,
    TerminatedPartial,
    GenerationError,
    Superseded,
    Disposed,
}

impl BlockingCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCanonicalData => "no_canonical_data",
            Self::AwaitingSecondSample => "awaiting_second_sample",
            Self::StabilizationTimeout => "stabilization_timeout",
            Self::CanonicalNotReady => "canonical_not_ready",
            Self::TerminatedPartial => "terminated_partial",
            Self::GenerationError => "generation_error",
            Self::Superseded => "superseded",
            Self::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for BlockingCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived, cached view of an attempt's capture readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResolution {
    pub attempt_id: Option<String>,
    pub platform: Option<String>,
    pub conversation_id: Option<String>,
    pub platform_generation_id: Option<String>,
    pub phase: Option<LifecyclePhase>,
    pub ready: bool,
    pub reason: ResolutionReason,
    pub blocking_conditions: Vec<BlockingCondition>,
    pub updated_at_ms: i64,
}

impl CaptureResolution {
    /// Resolution for an attempt (or conversation) the engine has never seen.
    pub fn not_captured(attempt_id: Option<String>, updated_at_ms: i64) -> Self {
        Self {
            attempt_id,
            platform: None,
            conversation_id: None,
            platform_generation_id: None,
            phase: None,
            ready: false,
            reason: ResolutionReason::NotCaptured,
            blocking_conditions: vec![BlockingCondition::NoCanonicalData],
            updated_at_ms,
        }
    }

    /// Resolution for an attempt evicted after it was disposed or superseded.
    ///
    /// Only the id and final phase survive eviction.
    pub fn retired(attempt_id: impl Into<String>, phase: LifecyclePhase, updated_at_ms: i64) -> Self {
        let (reason, blocking_conditions) = phase_blocking(phase);
        Self {
            attempt_id: Some(attempt_id.into()),
            platform: None,
            conversation_id: None,
            platform_generation_id: None,
            phase: Some(phase),
            ready: false,
            reason,
            blocking_conditions,
            updated_at_ms,
        }
    }

    /// Default resolution for a descriptor, derived from its phase alone.
    pub fn from_descriptor(descriptor: &AttemptDescriptor) -> Self {
        let (reason, blocking) = if descriptor.disposed {
            (ResolutionReason::Disposed, vec![BlockingCondition::Disposed])
        } else {
            phase_blocking(descriptor.phase)
        };

        Self {
            attempt_id: Some(descriptor.attempt_id.clone()),
            platform: Some(descriptor.platform.clone()),
            conversation_id: descriptor.conversation_id.clone(),
            platform_generation_id: descriptor.platform_generation_id.clone(),
            phase: Some(descriptor.phase),
            ready: !descriptor.disposed && descriptor.phase == LifecyclePhase::CapturedReady,
            reason,
            blocking_conditions: blocking,
            updated_at_ms: descriptor.updated_at_ms,
        }
    }

    /// Replace the reason and blocking conditions, keeping identity fields.
    pub fn with_blocking(
        mut self,
        reason: ResolutionReason,
        blocking_conditions: Vec<BlockingCondition>,
    ) -> Self {
        self.reason = reason;
        self.blocking_conditions = blocking_conditions;
        self
    }

    pub fn is_blocked_by(&self, condition: BlockingCondition) -> bool {
        self.blocking_conditions.contains(&condition)
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == Some(LifecyclePhase::Disposed) || self.is_blocked_by(BlockingCondition::Disposed)
    }
}

fn phase_blocking(phase: LifecyclePhase) -> (ResolutionReason, Vec<BlockingCondition>) {
    match phase {
        LifecyclePhase::Idle
        | LifecyclePhase::PromptSent
        | LifecyclePhase::Streaming
        | LifecyclePhase::CompletedHint => (
            ResolutionReason::AwaitingCanonical,
            vec![BlockingCondition::NoCanonicalData],
        ),
        LifecyclePhase::CanonicalProbing => (
            ResolutionReason::Stabilizing,
            vec![BlockingCondition::AwaitingSecondSample],
        ),
        LifecyclePhase::CapturedReady => (ResolutionReason::Captured, Vec::new()),
        LifecyclePhase::TerminatedPartial => (
            ResolutionReason::TerminatedPartial,
            vec![BlockingCondition::TerminatedPartial],
        ),
        LifecyclePhase::Error => (ResolutionReason::Failed, vec![BlockingCondition::GenerationError]),
        LifecyclePhase::Superseded => (ResolutionReason::Superseded, vec![BlockingCondition::Superseded]),
        LifecyclePhase::Disposed => (ResolutionReason::Disposed, vec![BlockingCondition::Disposed]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_captured_shape() {
        let resolution = CaptureResolution::not_captured(Some("a9".to_string()), 0);
        assert!(!resolution.ready);
        assert_eq!(resolution.reason, ResolutionReason::NotCaptured);
        assert_eq!(resolution.blocking_conditions, vec![BlockingCondition::NoCanonicalData]);
        assert!(resolution.phase.is_none());
    }

    #[test]
    fn test_disposed_descriptor_blocks_only_on_disposed() {
        let mut descriptor = AttemptDescriptor::new("a1", "chatgpt", 10);
        descriptor.phase = LifecyclePhase::Disposed;
        descriptor.disposed = true;
        let resolution = CaptureResolution::from_descriptor(&descriptor);
        assert!(!resolution.ready);
        assert_eq!(resolution.blocking_conditions, vec![BlockingCondition::Disposed]);
        assert!(resolution.is_disposed());
    }

    #[test]
    fn test_retired_resolution_keeps_final_phase() {
        let superseded = CaptureResolution::retired("a1", LifecyclePhase::Superseded, 40);
        assert!(!superseded.ready);
        assert_eq!(superseded.reason, ResolutionReason::Superseded);
        assert_eq!(superseded.blocking_conditions, vec![BlockingCondition::Superseded]);

        let disposed = CaptureResolution::retired("a2", LifecyclePhase::Disposed, 40);
        assert!(disposed.is_disposed());
        assert!(disposed.platform.is_none());
    }

    #[test]
    fn test_captured_ready_descriptor_is_ready() {
        let mut descriptor = AttemptDescriptor::new("a1", "chatgpt", 10);
        descriptor.phase = LifecyclePhase::CapturedReady;
        let resolution = CaptureResolution::from_descriptor(&descriptor);
        assert!(resolution.ready);
        assert!(resolution.blocking_conditions.is_empty());
        assert_eq!(resolution.reason, ResolutionReason::Captured);
    }

    #[test]
    fn test_blocking_condition_tags_serialize_snake_case() {
        let json = serde_json::to_value(vec![
            BlockingCondition::AwaitingSecondSample,
            BlockingCondition::StabilizationTimeout,
        ])
        .unwrap();
        assert_eq!(json, serde_json::json!(["awaiting_second_sample", "stabilization_timeout"]));
    }
}
