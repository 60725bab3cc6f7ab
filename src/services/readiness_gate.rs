//! Two-sample stabilization gate.
//!
//! A single terminal-looking canonical sample is never trusted: the same
//! content hash has to be observed again at least `min_stable_ms` later.
//! Attempts that keep changing for longer than `max_stabilization_wait_ms`
//! after their first terminal sample time out until explicitly reset.

use std::collections::HashMap;

use crate::domain::models::config::{millis, ReadinessConfig};
use crate::domain::models::{BlockingCondition, ResolutionReason, SampleReadiness};

/// Outcome of feeding one sample through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub ready: bool,
    pub reason: ResolutionReason,
    pub blocking_conditions: Vec<BlockingCondition>,
}

impl GateVerdict {
    fn ready() -> Self {
        Self {
            ready: true,
            reason: ResolutionReason::Captured,
            blocking_conditions: Vec::new(),
        }
    }

    fn blocked(reason: ResolutionReason, condition: BlockingCondition) -> Self {
        Self {
            ready: false,
            reason,
            blocking_conditions: vec![condition],
        }
    }

    fn awaiting_second_sample() -> Self {
        Self::blocked(ResolutionReason::Stabilizing, BlockingCondition::AwaitingSecondSample)
    }

    fn timed_out() -> Self {
        Self::blocked(
            ResolutionReason::StabilizationTimeout,
            BlockingCondition::StabilizationTimeout,
        )
    }

    fn not_ready() -> Self {
        Self::blocked(ResolutionReason::CanonicalNotReady, BlockingCondition::CanonicalNotReady)
    }
}

#[derive(Debug, Clone)]
struct StabilizationWindow {
    content_hash: String,
    /// When the current hash was first seen
    hash_since_ms: i64,
    /// First terminal sample of the window; the timeout is measured from here
    window_start_ms: i64,
    last_sample_ms: i64,
    timed_out: bool,
}

pub struct ReadinessGate {
    min_stable_ms: i64,
    max_wait_ms: i64,
    windows: HashMap<String, StabilizationWindow>,
}

impl ReadinessGate {
    pub fn new(config: &ReadinessConfig) -> Self {
        Self {
            min_stable_ms: millis(config.min_stable_ms),
            max_wait_ms: millis(config.max_stabilization_wait_ms),
            windows: HashMap::new(),
        }
    }

    pub fn evaluate(
        &mut self,
        attempt_id: &str,
        readiness: &SampleReadiness,
        timestamp_ms: i64,
    ) -> GateVerdict {
        if self.windows.get(attempt_id).is_some_and(|w| w.timed_out) {
            return GateVerdict::timed_out();
        }

        let content_hash = match readiness.content_hash.as_deref() {
            Some(hash) if readiness.looks_final() && !hash.is_empty() => hash,
            _ => {
                self.windows.remove(attempt_id);
                return GateVerdict::not_ready();
            }
        };

        let Some(window) = self.windows.get_mut(attempt_id) else {
            self.windows.insert(
                attempt_id.to_string(),
                StabilizationWindow {
                    content_hash: content_hash.to_string(),
                    hash_since_ms: timestamp_ms,
                    window_start_ms: timestamp_ms,
                    last_sample_ms: timestamp_ms,
                    timed_out: false,
                },
            );
            return GateVerdict::awaiting_second_sample();
        };

        if timestamp_ms < window.last_sample_ms {
            return GateVerdict::awaiting_second_sample();
        }
        window.last_sample_ms = timestamp_ms;

        let same_hash = window.content_hash == content_hash;
        if same_hash && timestamp_ms - window.hash_since_ms >= self.min_stable_ms {
            self.windows.remove(attempt_id);
            return GateVerdict::ready();
        }

        if timestamp_ms - window.window_start_ms > self.max_wait_ms {
            window.timed_out = true;
            return GateVerdict::timed_out();
        }

        if !same_hash {
            window.content_hash = content_hash.to_string();
            window.hash_since_ms = timestamp_ms;
        }
        GateVerdict::awaiting_second_sample()
    }

    /// Current verdict for an attempt without feeding a sample.
    pub fn peek(&self, attempt_id: &str) -> Option<GateVerdict> {
        self.windows.get(attempt_id).map(|window| {
            if window.timed_out {
                GateVerdict::timed_out()
            } else {
                GateVerdict::awaiting_second_sample()
            }
        })
    }

    pub fn reset(&mut self, attempt_id: &str) {
        self.windows.remove(attempt_id);
    }

    pub fn is_tracking(&self, attempt_id: &str) -> bool {
        self.windows.contains_key(attempt_id)
    }

    /// Keep only windows whose attempt satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.windows.retain(|id, _| keep(id));
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
