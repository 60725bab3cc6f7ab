//! Signal fusion engine.
//!
//! Single entry point for lifecycle signals and canonical samples. Composes
//! the attempt tracker, the readiness gate and the probe scheduler, and keeps
//! a bounded cache of the resolutions it hands out.
//!
//! Nothing here returns an error for expected conditions: disposed attempts,
//! regressive signals and unready samples all surface as data on the
//! returned [`CaptureResolution`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::attempt_tracker::AttemptTracker;
use super::readiness_gate::ReadinessGate;
use crate::domain::models::config::{millis, Config, EngineConfig};
use crate::domain::models::{
    AttemptDescriptor, BlockingCondition, CanonicalSample, CaptureResolution, CreateAttemptInput,
    FusionMessage, FusionSignal, LifecyclePhase, ResolutionReason,
};
use crate::domain::ports::{Clock, NullProbeScheduler, ProbeScheduler};

#[derive(Debug, Clone)]
struct CachedResolution {
    resolution: CaptureResolution,
    phase: LifecyclePhase,
    updated_at_ms: i64,
}

/// Counters reported by [`SignalFusionEngine::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Descriptors currently held by the tracker
    pub tracked_attempts: usize,
    /// Evicted disposed or superseded ids still remembered
    pub retired_attempts: usize,
    /// Entries in the resolution cache
    pub cached_resolutions: usize,
    /// Attempts with an open stabilization window
    pub gate_windows: usize,
    /// Latest canonical samples kept for capture export
    pub retained_samples: usize,
    /// Probes the scheduler reports as running
    pub active_probes: usize,
}

/// What a maintenance pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Attempts evicted by the tracker TTL sweep and size bound
    pub evicted_attempts: Vec<String>,
    /// Resolution cache entries dropped
    pub pruned_resolutions: usize,
}

/// Fuses lifecycle signals and canonical samples into capture resolutions.
///
/// Synchronous; async callers share it behind a `tokio::sync::Mutex`.
pub struct SignalFusionEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    tracker: AttemptTracker,
    gate: ReadinessGate,
    probes: Arc<dyn ProbeScheduler>,
    resolutions: HashMap<String, CachedResolution>,
    samples: HashMap<String, CanonicalSample>,
    last_prune_ms: Option<i64>,
}

impl SignalFusionEngine {
    /// Engine that starts and cancels verification probes through `probes`.
    pub fn new(config: &Config, clock: Arc<dyn Clock>, probes: Arc<dyn ProbeScheduler>) -> Self {
        Self {
            config: config.engine.clone(),
            tracker: AttemptTracker::new(config.tracker.clone(), Arc::clone(&clock)),
            gate: ReadinessGate::new(&config.readiness),
            clock,
            probes,
            resolutions: HashMap::new(),
            samples: HashMap::new(),
            last_prune_ms: None,
        }
    }

    /// Engine with the given configuration and no probe side effects.
    pub fn with_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::new(config, clock, Arc::new(NullProbeScheduler))
    }

    /// Apply a lifecycle hint.
    pub fn ingest_signal(&mut self, signal: &FusionSignal) -> CaptureResolution {
        let attempt_id = signal.attempt_id.as_str();
        let ts = signal.timestamp_ms;

        if self.is_dead(attempt_id) {
            debug!(attempt_id, phase = %signal.phase, "signal for disposed or retired attempt ignored");
            return self.resolve(attempt_id);
        }

        self.ensure_attempt(
            attempt_id,
            &signal.platform,
            signal.conversation_id.as_deref(),
            signal.platform_generation_id.as_deref(),
            ts,
        );

        let Some(current) = self.tracker.get(attempt_id).map(|d| d.phase) else {
            return self.resolve(attempt_id);
        };
        let requested = signal.phase;

        if requested == LifecyclePhase::Disposed {
            return self.dispose(attempt_id);
        }
        if current.is_regressive(requested) {
            debug!(
                attempt_id,
                current = %current,
                requested = %requested,
                source = signal.source.as_str(),
                "regressive signal ignored"
            );
            return self.resolve(attempt_id);
        }

        match requested {
            LifecyclePhase::CapturedReady => {
                debug!(attempt_id, "captured_ready is only reachable through canonical stabilization");
                return self.resolve(attempt_id);
            }
            LifecyclePhase::Superseded => {
                self.tracker.mark_superseded(attempt_id, None, ts);
            }
            phase => {
                self.tracker.update_phase(attempt_id, phase, ts);
            }
        }

        if requested == LifecyclePhase::CompletedHint {
            self.probes.start(attempt_id);
        } else if requested.is_terminal() {
            self.probes.cancel(attempt_id);
        }

        self.resolve(attempt_id)
    }

    /// Run a canonical sample through the stabilization gate.
    pub fn apply_canonical_sample(&mut self, sample: &CanonicalSample) -> CaptureResolution {
        let attempt_id = sample.attempt_id.as_str();
        let ts = sample.timestamp_ms;

        if self.is_dead(attempt_id) {
            debug!(attempt_id, "canonical sample for disposed or retired attempt ignored");
            return self.resolve(attempt_id);
        }

        self.ensure_attempt(attempt_id, &sample.platform, Some(&sample.conversation_id), None, ts);

        let Some(phase) = self.tracker.get(attempt_id).map(|d| d.phase) else {
            return self.resolve(attempt_id);
        };
        if phase.is_terminal() {
            debug!(attempt_id, phase = %phase, "canonical sample for settled attempt ignored");
            return self.resolve(attempt_id);
        }

        self.tracker
            .update_phase(attempt_id, LifecyclePhase::CanonicalProbing, ts);
        self.retain_sample(sample);

        let verdict = self.gate.evaluate(attempt_id, &sample.readiness, ts);
        if verdict.ready {
            return self.promote_captured(attempt_id, ts, false);
        }

        let Some(descriptor) = self.tracker.get(attempt_id) else {
            return self.resolve(attempt_id);
        };
        let resolution = CaptureResolution::from_descriptor(descriptor)
            .with_blocking(verdict.reason, verdict.blocking_conditions);
        self.cache(resolution)
    }

    /// Accept a lower-fidelity sample as the capture when the canonical source is unreachable.
    ///
    /// Only samples whose own readiness is ready and terminal are accepted;
    /// disposed, superseded and otherwise settled attempts are left alone.
    pub fn accept_degraded_sample(&mut self, sample: &CanonicalSample) -> CaptureResolution {
        let attempt_id = sample.attempt_id.as_str();
        let ts = sample.timestamp_ms;

        let Some(phase) = self
            .tracker
            .get(attempt_id)
            .filter(|d| !d.disposed)
            .map(|d| d.phase)
        else {
            return self.resolve(attempt_id);
        };
        if phase.is_terminal() || !sample.readiness.looks_final() {
            return self.resolve(attempt_id);
        }

        if phase != LifecyclePhase::CanonicalProbing {
            self.tracker
                .update_phase(attempt_id, LifecyclePhase::CanonicalProbing, ts);
        }
        self.retain_sample(sample);
        self.promote_captured(attempt_id, ts, true)
    }

    /// Apply a parsed wire message.
    pub fn apply_message(&mut self, message: &FusionMessage) -> CaptureResolution {
        match message {
            FusionMessage::Signal(signal) => self.ingest_signal(signal),
            FusionMessage::CanonicalSample(sample) => self.apply_canonical_sample(sample),
        }
    }

    /// Latest sample for an attempt, only once the attempt is captured.
    pub fn captured_data(&self, attempt_id: &str) -> Option<&CanonicalSample> {
        let descriptor = self.tracker.get(attempt_id)?;
        if descriptor.disposed || descriptor.phase != LifecyclePhase::CapturedReady {
            return None;
        }
        self.samples.get(attempt_id)
    }

    /// Current resolution for an attempt.
    ///
    /// Reuses the cached resolution while the attempt's phase and
    /// `updated_at_ms` are unchanged. Retired ids resolve to their final
    /// phase; ids never seen resolve as not captured.
    pub fn resolve(&mut self, attempt_id: &str) -> CaptureResolution {
        let Some(descriptor) = self.tracker.get(attempt_id) else {
            let now = self.clock.now_ms();
            return match self.tracker.retired_phase(attempt_id) {
                Some(phase) => CaptureResolution::retired(attempt_id, phase, now),
                None => CaptureResolution::not_captured(Some(attempt_id.to_string()), now),
            };
        };

        if let Some(cached) = self.resolutions.get(attempt_id) {
            if cached.phase == descriptor.phase && cached.updated_at_ms == descriptor.updated_at_ms {
                return cached.resolution.clone();
            }
        }

        let mut resolution = CaptureResolution::from_descriptor(descriptor);
        if descriptor.phase == LifecyclePhase::CanonicalProbing && !descriptor.disposed {
            if let Some(verdict) = self.gate.peek(attempt_id) {
                resolution = resolution.with_blocking(verdict.reason, verdict.blocking_conditions);
            }
        }
        self.cache(resolution)
    }

    /// Resolve through the conversation's active attempt, falling back to its latest one.
    pub fn resolve_by_conversation(&mut self, conversation_id: &str) -> CaptureResolution {
        let attempt_id = self
            .tracker
            .active_attempt_for(conversation_id)
            .or_else(|| self.tracker.latest_for_conversation(conversation_id))
            .map(|d| d.attempt_id.clone());

        match attempt_id {
            Some(id) => self.resolve(&id),
            None => {
                let mut resolution = CaptureResolution::not_captured(None, self.clock.now_ms());
                resolution.conversation_id = Some(conversation_id.to_string());
                resolution
            }
        }
    }

    /// Give a timed-out attempt another stabilization window.
    pub fn restart_canonical_recovery(&mut self, attempt_id: &str, timestamp_ms: i64) -> CaptureResolution {
        let restartable = self.tracker.get(attempt_id).is_some_and(|d| {
            !d.disposed
                && !matches!(
                    d.phase,
                    LifecyclePhase::Superseded
                        | LifecyclePhase::CapturedReady
                        | LifecyclePhase::TerminatedPartial
                        | LifecyclePhase::Error
                        | LifecyclePhase::Disposed
                )
        });
        if !restartable {
            return self.resolve(attempt_id);
        }

        self.gate.reset(attempt_id);
        let Some(descriptor) =
            self.tracker
                .update_phase(attempt_id, LifecyclePhase::CanonicalProbing, timestamp_ms)
        else {
            return self.resolve(attempt_id);
        };
        info!(attempt_id, "canonical recovery restarted");

        let resolution = CaptureResolution::from_descriptor(&descriptor).with_blocking(
            ResolutionReason::Stabilizing,
            vec![BlockingCondition::AwaitingSecondSample],
        );
        self.cache(resolution)
    }

    /// Cancel the probe, drop gate and sample state and mark the attempt disposed.
    ///
    /// Always returns a `[disposed]` resolution, including for unknown ids.
    pub fn dispose(&mut self, attempt_id: &str) -> CaptureResolution {
        self.release_attempt_state(attempt_id);

        match self.tracker.dispose(attempt_id) {
            Some(descriptor) => self.cache(CaptureResolution::from_descriptor(&descriptor)),
            None => CaptureResolution::retired(attempt_id, LifecyclePhase::Disposed, self.clock.now_ms()),
        }
    }

    /// Dispose every live attempt matching `predicate`.
    pub fn dispose_all<F>(&mut self, mut predicate: F) -> Vec<CaptureResolution>
    where
        F: FnMut(&AttemptDescriptor) -> bool,
    {
        let mut ids: Vec<String> = self
            .tracker
            .iter()
            .filter(|d| !d.disposed && predicate(*d))
            .map(|d| d.attempt_id.clone())
            .collect();
        ids.sort();

        ids.iter().map(|id| self.dispose(id)).collect()
    }

    /// Abandon every attempt without an outcome after a navigation.
    pub fn dispose_for_route_change(&mut self) -> Vec<String> {
        let disposed = self.tracker.dispose_all_for_route_change();
        for id in &disposed {
            self.release_attempt_state(id);
            self.resolutions.remove(id);
        }
        if !disposed.is_empty() {
            info!(count = disposed.len(), "attempts disposed for route change");
        }
        disposed
    }

    /// Bound the resolution cache; returns how many entries were dropped.
    ///
    /// Rate-limited by `prune_interval_ms`.
    pub fn prune_resolutions(&mut self, now_ms: i64) -> usize {
        if let Some(last) = self.last_prune_ms {
            if now_ms.saturating_sub(last) < millis(self.config.prune_interval_ms) {
                return 0;
            }
        }
        self.last_prune_ms = Some(now_ms);

        let before = self.resolutions.len();
        let ttl = millis(self.config.resolution_ttl_ms);
        let tracker = &self.tracker;
        self.resolutions.retain(|id, cached| {
            tracker.get(id).is_some()
                && !(cached.phase.is_terminal() && now_ms.saturating_sub(cached.updated_at_ms) > ttl)
        });

        let excess = self.resolutions.len().saturating_sub(self.config.max_resolutions);
        if excess > 0 {
            let mut oldest: Vec<(i64, String)> = self
                .resolutions
                .iter()
                .map(|(id, cached)| (cached.updated_at_ms, id.clone()))
                .collect();
            oldest.sort();
            for (_, id) in oldest.into_iter().take(excess) {
                self.resolutions.remove(&id);
            }
        }

        let pruned = before - self.resolutions.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.resolutions.len(), "resolution cache pruned");
        }
        pruned
    }

    /// Tracker TTL sweep plus resolution pruning.
    pub fn maintain(&mut self, now_ms: i64) -> MaintenanceReport {
        let evicted_attempts = self.tracker.cleanup(now_ms);
        for id in &evicted_attempts {
            self.resolutions.remove(id);
            self.samples.remove(id);
        }

        let tracker = &self.tracker;
        self.gate.retain(|id| tracker.get(id).is_some_and(|d| !d.disposed));
        self.samples.retain(|id, _| tracker.get(id).is_some());

        MaintenanceReport {
            evicted_attempts,
            pruned_resolutions: self.prune_resolutions(now_ms),
        }
    }

    /// Sizes of the engine's bounded containers.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tracked_attempts: self.tracker.len(),
            retired_attempts: self.tracker.retired_len(),
            cached_resolutions: self.resolutions.len(),
            gate_windows: self.gate.len(),
            retained_samples: self.samples.len(),
            active_probes: self.probes.active_count(),
        }
    }

    /// Tracked descriptor for an attempt, if it has not been evicted.
    pub fn attempt(&self, attempt_id: &str) -> Option<&AttemptDescriptor> {
        self.tracker.get(attempt_id)
    }

    /// Read-only view of the attempt tracker.
    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    fn is_dead(&self, attempt_id: &str) -> bool {
        self.tracker.get(attempt_id).is_some_and(|d| d.disposed)
            || self.tracker.retired_phase(attempt_id).is_some()
    }

    fn ensure_attempt(
        &mut self,
        attempt_id: &str,
        platform: &str,
        conversation_id: Option<&str>,
        generation_id: Option<&str>,
        ts: i64,
    ) {
        if self.tracker.retired_phase(attempt_id).is_some() {
            return;
        }
        let Some(existing) = self.tracker.get(attempt_id) else {
            let mut input = CreateAttemptInput::new(attempt_id, platform).at(ts);
            input.conversation_id = conversation_id.map(str::to_string);
            input.platform_generation_id = generation_id.map(str::to_string);
            self.tracker.create(input);
            return;
        };

        let rebind = conversation_id.filter(|c| existing.conversation_id.as_deref() != Some(*c));
        let regenerate =
            generation_id.filter(|g| existing.platform_generation_id.as_deref() != Some(*g));

        if let Some(conversation_id) = rebind {
            self.tracker.update_conversation_id(attempt_id, conversation_id, ts);
        }
        if let Some(generation_id) = regenerate {
            self.tracker.update_generation_id(attempt_id, generation_id, ts);
        }
    }

    fn promote_captured(&mut self, attempt_id: &str, ts: i64, degraded: bool) -> CaptureResolution {
        self.tracker
            .update_phase(attempt_id, LifecyclePhase::CapturedReady, ts);
        self.gate.reset(attempt_id);
        self.probes.cancel(attempt_id);
        info!(attempt_id, degraded, "attempt captured");
        self.resolve(attempt_id)
    }

    fn retain_sample(&mut self, sample: &CanonicalSample) {
        let newer = self
            .samples
            .get(&sample.attempt_id)
            .is_none_or(|held| sample.timestamp_ms >= held.timestamp_ms);
        if newer {
            self.samples.insert(sample.attempt_id.clone(), sample.clone());
        }
    }

    fn release_attempt_state(&mut self, attempt_id: &str) {
        self.probes.cancel(attempt_id);
        self.gate.reset(attempt_id);
        self.samples.remove(attempt_id);
    }

    fn cache(&mut self, resolution: CaptureResolution) -> CaptureResolution {
        if let (Some(id), Some(phase)) = (resolution.attempt_id.clone(), resolution.phase) {
            self.resolutions.insert(
                id,
                CachedResolution {
                    resolution: resolution.clone(),
                    phase,
                    updated_at_ms: resolution.updated_at_ms,
                },
            );
        }
        resolution
    }
}
