//! Attempt bookkeeping.
//!
//! Owns every [`AttemptDescriptor`] and the conversation -> active attempt
//! mapping. Phase legality is not checked here; the fusion engine decides
//! which transitions to apply and the tracker records them.
//!
//! Evicted disposed and superseded attempts leave their id behind in a
//! bounded retired set so late input for them cannot revive the attempt.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::domain::models::config::{millis, TrackerConfig};
use crate::domain::models::{AttemptDescriptor, CreateAttemptInput, LifecyclePhase};
use crate::domain::ports::Clock;

/// Retired ids kept per unit of `max_attempts`.
const RETIRED_PER_ATTEMPT: usize = 4;

pub struct AttemptTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    attempts: HashMap<String, AttemptDescriptor>,
    active_by_conversation: HashMap<String, String>,
    retired: HashMap<String, LifecyclePhase>,
    /// Oldest first
    retired_order: VecDeque<String>,
}

impl AttemptTracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            attempts: HashMap::new(),
            active_by_conversation: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
        }
    }

    /// Create an attempt, or return the existing one with the same id.
    ///
    /// A new attempt bound to a conversation supersedes whichever different
    /// attempt was active for it. Callers check [`Self::retired_phase`]
    /// first; a retired id is not revived here.
    pub fn create(&mut self, input: CreateAttemptInput) -> AttemptDescriptor {
        if let Some(existing) = self.attempts.get(&input.attempt_id) {
            return existing.clone();
        }

        let now = input.timestamp_ms.unwrap_or_else(|| self.clock.now_ms());
        let mut descriptor = AttemptDescriptor::new(input.attempt_id.clone(), input.platform, now);
        descriptor.platform_generation_id = input.platform_generation_id;

        if let Some(conversation_id) = input.conversation_id {
            self.take_over_conversation(&input.attempt_id, &conversation_id, now);
            descriptor.conversation_id = Some(conversation_id);
        }

        debug!(attempt_id = %descriptor.attempt_id, platform = %descriptor.platform, "attempt created");
        self.attempts.insert(input.attempt_id, descriptor.clone());
        self.trim();
        descriptor
    }

    /// Bind an attempt to a conversation, superseding the conversation's prior active attempt.
    pub fn update_conversation_id(
        &mut self,
        attempt_id: &str,
        conversation_id: &str,
        timestamp_ms: i64,
    ) -> Option<AttemptDescriptor> {
        let descriptor = self.attempts.get(attempt_id)?;
        if descriptor.disposed {
            return Some(descriptor.clone());
        }

        let previous = descriptor.conversation_id.clone();
        let superseded = descriptor.phase == LifecyclePhase::Superseded;

        if let Some(previous) = previous.as_deref() {
            if previous != conversation_id {
                self.release_conversation(previous, attempt_id);
            }
        }
        if !superseded {
            self.take_over_conversation(attempt_id, conversation_id, timestamp_ms);
        }

        let descriptor = self.attempts.get_mut(attempt_id)?;
        descriptor.conversation_id = Some(conversation_id.to_string());
        descriptor.touch(timestamp_ms);
        Some(descriptor.clone())
    }

    pub fn update_generation_id(
        &mut self,
        attempt_id: &str,
        generation_id: &str,
        timestamp_ms: i64,
    ) -> Option<AttemptDescriptor> {
        let descriptor = self.attempts.get_mut(attempt_id)?;
        if !descriptor.disposed {
            descriptor.platform_generation_id = Some(generation_id.to_string());
            descriptor.touch(timestamp_ms);
        }
        Some(descriptor.clone())
    }

    /// Overwrite the phase unconditionally; disposed attempts never change.
    pub fn update_phase(
        &mut self,
        attempt_id: &str,
        phase: LifecyclePhase,
        timestamp_ms: i64,
    ) -> Option<AttemptDescriptor> {
        let descriptor = self.attempts.get_mut(attempt_id)?;
        if !descriptor.disposed {
            descriptor.phase = phase;
            descriptor.touch(timestamp_ms);
        }
        Some(descriptor.clone())
    }

    pub fn mark_superseded(
        &mut self,
        attempt_id: &str,
        superseded_by: Option<&str>,
        timestamp_ms: i64,
    ) -> Option<AttemptDescriptor> {
        let descriptor = self.attempts.get_mut(attempt_id)?;
        if descriptor.disposed {
            return Some(descriptor.clone());
        }

        descriptor.phase = LifecyclePhase::Superseded;
        descriptor.superseded_by_attempt_id = superseded_by.map(str::to_string);
        descriptor.touch(timestamp_ms);
        let snapshot = descriptor.clone();

        if let Some(conversation_id) = snapshot.conversation_id.as_deref() {
            self.release_conversation(conversation_id, attempt_id);
        }
        debug!(attempt_id, superseded_by = ?superseded_by, "attempt superseded");
        Some(snapshot)
    }

    /// Tear an attempt down for good.
    ///
    /// Unknown ids return `None` but are retired as disposed, so the id
    /// stays dead if input for it shows up later.
    pub fn dispose(&mut self, attempt_id: &str) -> Option<AttemptDescriptor> {
        let now = self.clock.now_ms();
        let Some(descriptor) = self.attempts.get_mut(attempt_id) else {
            self.retire(attempt_id, LifecyclePhase::Disposed);
            return None;
        };
        if descriptor.disposed {
            return Some(descriptor.clone());
        }

        descriptor.disposed = true;
        descriptor.phase = LifecyclePhase::Disposed;
        descriptor.touch(now);
        let snapshot = descriptor.clone();

        if let Some(conversation_id) = snapshot.conversation_id.as_deref() {
            self.release_conversation(conversation_id, attempt_id);
        }
        debug!(attempt_id, "attempt disposed");
        Some(snapshot)
    }

    /// Dispose every attempt that has no outcome yet; returns the disposed ids.
    pub fn dispose_all_for_route_change(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .attempts
            .values()
            .filter(|d| !d.disposed && !d.phase.is_settled())
            .map(|d| d.attempt_id.clone())
            .collect();
        ids.sort();

        for id in &ids {
            self.dispose(id);
        }
        ids
    }

    /// Evict settled or disposed attempts, oldest-updated first, down to `max_attempts`.
    pub fn trim(&mut self) -> Vec<String> {
        let excess = self.attempts.len().saturating_sub(self.config.max_attempts);
        if excess == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(i64, String)> = self
            .attempts
            .values()
            .filter(|d| d.is_evictable())
            .map(|d| (d.updated_at_ms, d.attempt_id.clone()))
            .collect();
        candidates.sort();

        let evicted: Vec<String> = candidates.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &evicted {
            self.evict(id);
        }
        evicted
    }

    /// Drop settled or disposed attempts idle longer than `attempt_ttl_ms`, then trim.
    pub fn cleanup(&mut self, now_ms: i64) -> Vec<String> {
        let ttl = millis(self.config.attempt_ttl_ms);
        let mut expired: Vec<String> = self
            .attempts
            .values()
            .filter(|d| d.is_evictable() && now_ms.saturating_sub(d.updated_at_ms) > ttl)
            .map(|d| d.attempt_id.clone())
            .collect();
        expired.sort();

        for id in &expired {
            self.evict(id);
        }
        expired.extend(self.trim());
        expired
    }

    pub fn get(&self, attempt_id: &str) -> Option<&AttemptDescriptor> {
        self.attempts.get(attempt_id)
    }

    /// Final phase of an attempt that was evicted (or disposed unseen).
    pub fn retired_phase(&self, attempt_id: &str) -> Option<LifecyclePhase> {
        if self.attempts.contains_key(attempt_id) {
            return None;
        }
        self.retired.get(attempt_id).copied()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub fn active_attempt_for(&self, conversation_id: &str) -> Option<&AttemptDescriptor> {
        self.active_by_conversation
            .get(conversation_id)
            .and_then(|id| self.attempts.get(id))
    }

    /// Most recently updated attempt ever bound to the conversation, active or not.
    pub fn latest_for_conversation(&self, conversation_id: &str) -> Option<&AttemptDescriptor> {
        self.attempts
            .values()
            .filter(|d| d.conversation_id.as_deref() == Some(conversation_id))
            .max_by(|a, b| {
                a.updated_at_ms
                    .cmp(&b.updated_at_ms)
                    .then(a.created_at_ms.cmp(&b.created_at_ms))
            })
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptDescriptor> {
        self.attempts.values()
    }

    fn take_over_conversation(&mut self, attempt_id: &str, conversation_id: &str, timestamp_ms: i64) {
        if let Some(holder) = self.active_by_conversation.get(conversation_id).cloned() {
            if holder != attempt_id {
                self.mark_superseded(&holder, Some(attempt_id), timestamp_ms);
            }
        }
        self.active_by_conversation
            .insert(conversation_id.to_string(), attempt_id.to_string());
    }

    fn release_conversation(&mut self, conversation_id: &str, attempt_id: &str) {
        if self.active_by_conversation.get(conversation_id).map(String::as_str) == Some(attempt_id) {
            self.active_by_conversation.remove(conversation_id);
        }
    }

    fn evict(&mut self, attempt_id: &str) {
        let Some(descriptor) = self.attempts.remove(attempt_id) else {
            return;
        };
        if let Some(conversation_id) = descriptor.conversation_id.as_deref() {
            self.release_conversation(conversation_id, attempt_id);
        }

        if descriptor.disposed {
            self.retire(attempt_id, LifecyclePhase::Disposed);
        } else if descriptor.phase == LifecyclePhase::Superseded {
            self.retire(attempt_id, LifecyclePhase::Superseded);
        }
    }

    fn retire(&mut self, attempt_id: &str, phase: LifecyclePhase) {
        if self.retired.insert(attempt_id.to_string(), phase).is_none() {
            self.retired_order.push_back(attempt_id.to_string());
        }

        let cap = self.config.max_attempts.saturating_mul(RETIRED_PER_ATTEMPT).max(1);
        while self.retired.len() > cap {
            let Some(oldest) = self.retired_order.pop_front() else {
                break;
            };
            self.retired.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ManualClock;

    fn tracker_with(max_attempts: usize) -> AttemptTracker {
        let config = TrackerConfig {
            max_attempts,
            attempt_ttl_ms: 1_000,
        };
        AttemptTracker::new(config, Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn test_create_is_idempotent() {
        let mut tracker = tracker_with(10);
        let first = tracker.create(CreateAttemptInput::new("a1", "chatgpt").at(100));
        let second = tracker.create(CreateAttemptInput::new("a1", "claude").at(900));
        assert_eq!(first, second);
        assert_eq!(second.platform, "chatgpt");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_create_uses_clock_without_timestamp() {
        let clock = Arc::new(ManualClock::new(4_242));
        let mut tracker = AttemptTracker::new(TrackerConfig::default(), clock);
        let descriptor = tracker.create(CreateAttemptInput::new("a1", "gemini"));
        assert_eq!(descriptor.created_at_ms, 4_242);
        assert_eq!(descriptor.phase, LifecyclePhase::Idle);
    }

    #[test]
    fn test_create_supersedes_prior_active_attempt() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("a1", "chatgpt").with_conversation("c1").at(100));
        tracker.create(CreateAttemptInput::new("a2", "chatgpt").with_conversation("c1").at(200));

        let prior = tracker.get("a1").unwrap();
        assert_eq!(prior.phase, LifecyclePhase::Superseded);
        assert_eq!(prior.superseded_by_attempt_id.as_deref(), Some("a2"));
        assert_eq!(tracker.active_attempt_for("c1").unwrap().attempt_id, "a2");
    }

    #[test]
    fn test_rebind_releases_old_conversation() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("a1", "chatgpt").with_conversation("c1").at(100));
        tracker.update_conversation_id("a1", "c2", 150);

        assert!(tracker.active_attempt_for("c1").is_none());
        assert_eq!(tracker.active_attempt_for("c2").unwrap().attempt_id, "a1");
    }

    #[test]
    fn test_rebind_onto_held_conversation_supersedes_holder() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("a1", "claude").with_conversation("c1").at(100));
        tracker.create(CreateAttemptInput::new("a2", "claude").at(120));
        tracker.update_conversation_id("a2", "c1", 130);

        assert_eq!(tracker.get("a1").unwrap().phase, LifecyclePhase::Superseded);
        assert_eq!(tracker.active_attempt_for("c1").unwrap().attempt_id, "a2");
    }

    #[test]
    fn test_disposed_attempt_is_frozen() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("a1", "chatgpt").with_conversation("c1").at(100));
        tracker.dispose("a1");

        let after = tracker.update_phase("a1", LifecyclePhase::Streaming, 500).unwrap();
        assert_eq!(after.phase, LifecyclePhase::Disposed);
        assert!(after.disposed);
        assert!(tracker.active_attempt_for("c1").is_none());
        assert!(tracker.dispose("missing").is_none());
    }

    #[test]
    fn test_updated_at_never_moves_backwards() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("a1", "chatgpt").at(500));
        let descriptor = tracker.update_phase("a1", LifecyclePhase::Streaming, 300).unwrap();
        assert_eq!(descriptor.updated_at_ms, 500);
    }

    #[test]
    fn test_route_change_disposes_only_unsettled() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("streaming", "chatgpt").at(1));
        tracker.update_phase("streaming", LifecyclePhase::Streaming, 2);
        tracker.create(CreateAttemptInput::new("ready", "chatgpt").at(1));
        tracker.update_phase("ready", LifecyclePhase::CapturedReady, 2);

        let disposed = tracker.dispose_all_for_route_change();
        assert_eq!(disposed, vec!["streaming".to_string()]);
        assert!(tracker.get("streaming").unwrap().disposed);
        assert_eq!(tracker.get("ready").unwrap().phase, LifecyclePhase::CapturedReady);
    }

    #[test]
    fn test_trim_never_evicts_progressing_attempts() {
        let mut tracker = tracker_with(2);
        tracker.create(CreateAttemptInput::new("done", "chatgpt").at(1));
        tracker.update_phase("done", LifecyclePhase::CapturedReady, 1);
        tracker.create(CreateAttemptInput::new("p1", "chatgpt").at(2));
        tracker.create(CreateAttemptInput::new("p2", "chatgpt").at(3));
        tracker.create(CreateAttemptInput::new("p3", "chatgpt").at(4));

        assert!(tracker.get("done").is_none());
        assert_eq!(tracker.len(), 3);
        assert!(tracker.get("p1").is_some());
    }

    #[test]
    fn test_cleanup_removes_idle_settled_attempts() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("old", "chatgpt").with_conversation("c1").at(0));
        tracker.update_phase("old", LifecyclePhase::Error, 0);
        tracker.create(CreateAttemptInput::new("live", "chatgpt").at(0));

        let removed = tracker.cleanup(5_000);
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(tracker.get("live").is_some());
        assert!(tracker.active_attempt_for("c1").is_none());
    }

    #[test]
    fn test_evicted_disposed_and_superseded_ids_are_retired() {
        let mut tracker = tracker_with(1);
        tracker.create(CreateAttemptInput::new("a1", "chatgpt").with_conversation("c1").at(1));
        tracker.create(CreateAttemptInput::new("a2", "chatgpt").with_conversation("c1").at(2));
        assert!(tracker.get("a1").is_none());
        assert_eq!(tracker.retired_phase("a1"), Some(LifecyclePhase::Superseded));

        tracker.dispose("a2");
        tracker.create(CreateAttemptInput::new("b1", "chatgpt").at(3));
        assert!(tracker.get("a2").is_none());
        assert_eq!(tracker.retired_phase("a2"), Some(LifecyclePhase::Disposed));
        assert_eq!(tracker.retired_phase("b1"), None);
    }

    #[test]
    fn test_evicted_settled_attempts_are_not_retired() {
        let mut tracker = tracker_with(1);
        tracker.create(CreateAttemptInput::new("done", "chatgpt").at(1));
        tracker.update_phase("done", LifecyclePhase::CapturedReady, 1);
        tracker.create(CreateAttemptInput::new("next", "chatgpt").at(2));

        assert!(tracker.get("done").is_none());
        assert_eq!(tracker.retired_phase("done"), None);
    }

    #[test]
    fn test_disposing_unknown_id_retires_it() {
        let mut tracker = tracker_with(10);
        assert!(tracker.dispose("ghost").is_none());
        assert_eq!(tracker.retired_phase("ghost"), Some(LifecyclePhase::Disposed));
    }

    #[test]
    fn test_retired_set_is_bounded() {
        let mut tracker = tracker_with(1);
        for i in 0..10 {
            tracker.dispose(&format!("ghost-{i}"));
        }
        assert_eq!(tracker.retired_len(), RETIRED_PER_ATTEMPT);
        assert_eq!(tracker.retired_phase("ghost-0"), None);
        assert_eq!(tracker.retired_phase("ghost-9"), Some(LifecyclePhase::Disposed));
    }

    #[test]
    fn test_latest_for_conversation_falls_back_to_inactive() {
        let mut tracker = tracker_with(10);
        tracker.create(CreateAttemptInput::new("a1", "chatgpt").with_conversation("c1").at(100));
        tracker.update_phase("a1", LifecyclePhase::Streaming, 150);
        tracker.dispose("a1");

        assert!(tracker.active_attempt_for("c1").is_none());
        assert_eq!(tracker.latest_for_conversation("c1").unwrap().attempt_id, "a1");
    }
}
