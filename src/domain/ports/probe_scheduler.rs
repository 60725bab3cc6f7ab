//! Start/cancel hook for expensive verification work.
//!
//! The engine calls into this port on phase transitions so it can trigger
//! probes without depending on whatever actually performs them.

use std::collections::HashSet;
use std::sync::Mutex;

/// Hook invoked when an attempt enters `completed_hint` (start) or a terminal
/// phase (cancel).
pub trait ProbeScheduler: Send + Sync {
    fn start(&self, attempt_id: &str);

    fn cancel(&self, attempt_id: &str);

    /// Number of probes currently running, when the implementation tracks them
    fn active_count(&self) -> usize {
        0
    }
}

/// Scheduler that ignores every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProbeScheduler;

impl ProbeScheduler for NullProbeScheduler {
    fn start(&self, _attempt_id: &str) {}

    fn cancel(&self, _attempt_id: &str) {}
}

/// Scheduler that only records which attempts have a probe running.
#[derive(Debug, Default)]
pub struct InMemoryProbeScheduler {
    active: Mutex<HashSet<String>>,
}

impl InMemoryProbeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, attempt_id: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(attempt_id))
            .unwrap_or(false)
    }
}

impl ProbeScheduler for InMemoryProbeScheduler {
    fn start(&self, attempt_id: &str) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(attempt_id.to_string());
        }
    }

    fn cancel(&self, attempt_id: &str) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(attempt_id);
        }
    }

    fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}
