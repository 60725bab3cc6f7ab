//! Canonical stabilization retry driver.
//!
//! A per-attempt timer loop outside the engine: it claims the conversation's
//! probe lease, pulls a fresh canonical sample, feeds it to the engine and
//! decides whether to retry, restart recovery, promote a degraded sample or
//! give up. Bounded by `max_retries` ticks and by
//! `retry_delay_ms * max_retries + timeout_grace_ms` of wall-clock time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::fusion_engine::SignalFusionEngine;
use super::probe_lease::ProbeLeaseCoordinator;
use crate::domain::models::config::{millis, RetryConfig};
use crate::domain::models::{BlockingCondition, CaptureResolution, LifecyclePhase};
use crate::domain::ports::{CanonicalSampleSource, Clock};

/// How a driver run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StabilizationOutcome {
    /// Canonical samples stabilized
    Captured,
    /// A degraded sample was accepted after repeated canonical failures
    DegradedPromoted,
    TimedOut { retries: u32, elapsed_ms: i64 },
    /// Attempt unknown, disposed, superseded or otherwise settled without capture
    Skipped { phase: Option<LifecyclePhase> },
    Cancelled,
    /// Another run for the same attempt is in flight
    AlreadyRunning,
}

/// Progress notifications published while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum StabilizationEvent {
    Tick { attempt_id: String, retry: u32 },
    LeaseDeferred { attempt_id: String, owner_attempt_id: Option<String> },
    FetchFailed { attempt_id: String, consecutive_failures: u32 },
    RecoveryRestarted { attempt_id: String },
    Finished { attempt_id: String, outcome: StabilizationOutcome },
}

pub struct StabilizationRetryDriver {
    engine: Arc<Mutex<SignalFusionEngine>>,
    leases: Arc<ProbeLeaseCoordinator>,
    source: Arc<dyn CanonicalSampleSource>,
    clock: Arc<dyn Clock>,
    config: RetryConfig,
    in_progress: StdMutex<HashSet<String>>,
    cancelled: StdMutex<HashSet<String>>,
    /// Timed-out attempts already warned about; limited to tracked attempts
    warned: StdMutex<HashSet<String>>,
    events: Option<mpsc::UnboundedSender<StabilizationEvent>>,
}

/// Removes the attempt from the in-progress set when a run ends, however it ends.
struct RunGuard<'a> {
    driver: &'a StabilizationRetryDriver,
    attempt_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.driver.in_progress.lock() {
            running.remove(&self.attempt_id);
        }
        if let Ok(mut cancelled) = self.driver.cancelled.lock() {
            cancelled.remove(&self.attempt_id);
        }
    }
}

impl StabilizationRetryDriver {
    pub fn new(
        engine: Arc<Mutex<SignalFusionEngine>>,
        leases: Arc<ProbeLeaseCoordinator>,
        source: Arc<dyn CanonicalSampleSource>,
        clock: Arc<dyn Clock>,
        config: RetryConfig,
    ) -> Self {
        Self {
            engine,
            leases,
            source,
            clock,
            config,
            in_progress: StdMutex::new(HashSet::new()),
            cancelled: StdMutex::new(HashSet::new()),
            warned: StdMutex::new(HashSet::new()),
            events: None,
        }
    }

    /// Publish progress events on `sender`.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<StabilizationEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Total wall-clock budget of a run.
    pub fn deadline_ms(&self) -> i64 {
        millis(self.config.retry_delay_ms)
            .saturating_mul(i64::from(self.config.max_retries))
            .saturating_add(millis(self.config.timeout_grace_ms))
    }

    pub fn is_running(&self, attempt_id: &str) -> bool {
        self.in_progress
            .lock()
            .map(|running| running.contains(attempt_id))
            .unwrap_or(false)
    }

    /// Ask a running loop to stop at its next tick. Returns false when nothing is running.
    pub fn cancel(&self, attempt_id: &str) -> bool {
        if !self.is_running(attempt_id) {
            return false;
        }
        self.cancelled
            .lock()
            .map(|mut cancelled| cancelled.insert(attempt_id.to_string()))
            .unwrap_or(false)
    }

    /// Drive several attempts concurrently.
    pub async fn run_all(&self, attempt_ids: &[String]) -> Vec<(String, StabilizationOutcome)> {
        let runs = attempt_ids.iter().map(|id| async move { (id.clone(), self.run(id).await) });
        join_all(runs).await
    }

    /// Drive one attempt until it is captured, promoted, timed out or abandoned.
    pub async fn run(&self, attempt_id: &str) -> StabilizationOutcome {
        let Some(_guard) = self.enter(attempt_id) else {
            debug!(attempt_id, "stabilization already running");
            return StabilizationOutcome::AlreadyRunning;
        };

        let outcome = self.drive(attempt_id).await;
        self.emit(StabilizationEvent::Finished {
            attempt_id: attempt_id.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn drive(&self, attempt_id: &str) -> StabilizationOutcome {
        let started = self.clock.now_ms();
        let mut retries: u32 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut restarted = false;

        loop {
            if self.take_cancellation(attempt_id) {
                self.release_lease(attempt_id).await;
                info!(attempt_id, "stabilization cancelled");
                return StabilizationOutcome::Cancelled;
            }

            let (resolution, conversation_id) = self.current(attempt_id).await;
            if let Some(outcome) = Self::settled_outcome(&resolution) {
                self.release_lease(attempt_id).await;
                return outcome;
            }

            let elapsed_ms = self.clock.now_ms().saturating_sub(started);
            if retries >= self.config.max_retries || elapsed_ms > self.deadline_ms() {
                return self.give_up(attempt_id, retries, elapsed_ms).await;
            }
            retries += 1;
            self.emit(StabilizationEvent::Tick {
                attempt_id: attempt_id.to_string(),
                retry: retries,
            });

            if let Some(conversation_id) = conversation_id.as_deref() {
                let claim = self
                    .leases
                    .claim(conversation_id, attempt_id, self.leases.default_ttl_ms())
                    .await;
                if !claim.acquired {
                    debug!(attempt_id, owner = ?claim.owner_attempt_id, "probe deferred to lease holder");
                    self.emit(StabilizationEvent::LeaseDeferred {
                        attempt_id: attempt_id.to_string(),
                        owner_attempt_id: claim.owner_attempt_id,
                    });
                    self.sleep().await;
                    continue;
                }
            }

            match self.source.fetch_canonical(attempt_id).await {
                Ok(Some(sample)) => {
                    consecutive_failures = 0;
                    let resolution = self.engine.lock().await.apply_canonical_sample(&sample);
                    if resolution.ready {
                        self.release_lease(attempt_id).await;
                        return StabilizationOutcome::Captured;
                    }
                    if resolution.is_blocked_by(BlockingCondition::StabilizationTimeout) {
                        if restarted {
                            let elapsed_ms = self.clock.now_ms().saturating_sub(started);
                            return self.give_up(attempt_id, retries, elapsed_ms).await;
                        }
                        restarted = true;
                        let now = self.clock.now_ms();
                        self.engine
                            .lock()
                            .await
                            .restart_canonical_recovery(attempt_id, now);
                        self.emit(StabilizationEvent::RecoveryRestarted {
                            attempt_id: attempt_id.to_string(),
                        });
                    }
                }
                Ok(None) => {
                    consecutive_failures += 1;
                    debug!(attempt_id, consecutive_failures, "no canonical data yet");
                }
                Err(err) => {
                    consecutive_failures += 1;
                    debug!(attempt_id, consecutive_failures, error = %err, "canonical fetch failed");
                }
            }

            if consecutive_failures > 0 {
                self.emit(StabilizationEvent::FetchFailed {
                    attempt_id: attempt_id.to_string(),
                    consecutive_failures,
                });
            }

            if consecutive_failures >= self.config.degraded_promotion_failures.max(1)
                && self.try_degraded_promotion(attempt_id).await
            {
                self.release_lease(attempt_id).await;
                return StabilizationOutcome::DegradedPromoted;
            }

            self.sleep().await;
        }
    }

    async fn try_degraded_promotion(&self, attempt_id: &str) -> bool {
        let Some(sample) = self.source.degraded_sample(attempt_id).await else {
            return false;
        };
        if !sample.readiness.looks_final() {
            return false;
        }

        let resolution = self.engine.lock().await.accept_degraded_sample(&sample);
        if resolution.ready {
            info!(attempt_id, "degraded sample promoted");
        }
        resolution.ready
    }

    async fn give_up(&self, attempt_id: &str, retries: u32, elapsed_ms: i64) -> StabilizationOutcome {
        let engine = self.engine.lock().await;
        let first_warning = self
            .warned
            .lock()
            .map(|mut warned| {
                warned.retain(|id| engine.attempt(id).is_some());
                warned.insert(attempt_id.to_string())
            })
            .unwrap_or(true);
        drop(engine);
        if first_warning {
            warn!(attempt_id, retries, elapsed_ms, "canonical stabilization timed out");
        }
        self.release_lease(attempt_id).await;
        StabilizationOutcome::TimedOut { retries, elapsed_ms }
    }

    async fn current(&self, attempt_id: &str) -> (CaptureResolution, Option<String>) {
        let mut engine = self.engine.lock().await;
        let resolution = engine.resolve(attempt_id);
        let conversation_id = engine
            .attempt(attempt_id)
            .and_then(|d| d.conversation_id.clone());
        (resolution, conversation_id)
    }

    fn settled_outcome(resolution: &CaptureResolution) -> Option<StabilizationOutcome> {
        if resolution.ready {
            return Some(StabilizationOutcome::Captured);
        }
        match resolution.phase {
            None => Some(StabilizationOutcome::Skipped { phase: None }),
            Some(phase) if phase.is_terminal() => Some(StabilizationOutcome::Skipped { phase: Some(phase) }),
            Some(_) => None,
        }
    }

    async fn release_lease(&self, attempt_id: &str) {
        let conversation_id = self
            .engine
            .lock()
            .await
            .attempt(attempt_id)
            .and_then(|d| d.conversation_id.clone());
        if let Some(conversation_id) = conversation_id {
            self.leases.release(&conversation_id, attempt_id).await;
        }
    }

    fn enter(&self, attempt_id: &str) -> Option<RunGuard<'_>> {
        let inserted = self
            .in_progress
            .lock()
            .map(|mut running| running.insert(attempt_id.to_string()))
            .unwrap_or(false);
        inserted.then(|| RunGuard {
            driver: self,
            attempt_id: attempt_id.to_string(),
        })
    }

    fn take_cancellation(&self, attempt_id: &str) -> bool {
        self.cancelled
            .lock()
            .map(|mut cancelled| cancelled.remove(attempt_id))
            .unwrap_or(false)
    }

    async fn sleep(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
    }

    fn emit(&self, event: StabilizationEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLeaseStore;
    use crate::domain::errors::SourceError;
    use crate::domain::models::{CanonicalSample, Config, LeaseConfig, SampleReadiness};
    use crate::domain::ports::ManualClock;
    use async_trait::async_trait;

    /// Returns the same terminal sample, advancing the manual clock on each fetch.
    struct SteadySource {
        clock: Arc<ManualClock>,
        step_ms: i64,
    }

    #[async_trait]
    impl CanonicalSampleSource for SteadySource {
        async fn fetch_canonical(&self, attempt_id: &str) -> Result<Option<CanonicalSample>, SourceError> {
            let ts = self.clock.advance(self.step_ms);
            Ok(Some(CanonicalSample::new(
                attempt_id,
                "chatgpt",
                "c1",
                ts,
                SampleReadiness::terminal("h1"),
            )))
        }
    }

    struct MissingSource;

    #[async_trait]
    impl CanonicalSampleSource for MissingSource {
        async fn fetch_canonical(&self, _attempt_id: &str) -> Result<Option<CanonicalSample>, SourceError> {
            Ok(None)
        }
    }

    fn driver_with(source: Arc<dyn CanonicalSampleSource>, clock: Arc<ManualClock>) -> StabilizationRetryDriver {
        let engine = Arc::new(Mutex::new(SignalFusionEngine::with_config(
            &Config::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )));
        let leases = Arc::new(ProbeLeaseCoordinator::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            LeaseConfig::default(),
        ));
        let config = RetryConfig {
            retry_delay_ms: 1,
            max_retries: 5,
            timeout_grace_ms: 60_000,
            degraded_promotion_failures: 2,
        };
        StabilizationRetryDriver::new(engine, leases, source, clock, config)
    }

    #[tokio::test]
    async fn test_unknown_attempt_is_skipped() {
        let clock = Arc::new(ManualClock::new(0));
        let source = Arc::new(SteadySource { clock: Arc::clone(&clock), step_ms: 600 });
        let driver = driver_with(source, clock);

        assert_eq!(driver.run("ghost").await, StabilizationOutcome::Skipped { phase: None });
        assert!(!driver.is_running("ghost"));
    }

    #[tokio::test]
    async fn test_steady_samples_capture() {
        let clock = Arc::new(ManualClock::new(0));
        let source = Arc::new(SteadySource { clock: Arc::clone(&clock), step_ms: 600 });
        let driver = driver_with(source, Arc::clone(&clock));
        driver.engine.lock().await.apply_canonical_sample(&CanonicalSample::new(
            "a1",
            "chatgpt",
            "c1",
            0,
            SampleReadiness::in_progress("streaming"),
        ));

        assert_eq!(driver.run("a1").await, StabilizationOutcome::Captured);
        assert!(driver.leases.snapshot().await.is_empty());
    }

    #[test]
    fn test_deadline_budget() {
        let clock = Arc::new(ManualClock::new(0));
        let source = Arc::new(SteadySource { clock: Arc::clone(&clock), step_ms: 1 });
        let mut driver = driver_with(source, clock);
        driver.config = RetryConfig::default();
        assert_eq!(driver.deadline_ms(), 1_500 * 6 + 3_000);
    }

    #[test]
    fn test_cancel_requires_running_loop() {
        let clock = Arc::new(ManualClock::new(0));
        let source = Arc::new(SteadySource { clock: Arc::clone(&clock), step_ms: 1 });
        let driver = driver_with(source, clock);
        assert!(!driver.cancel("a1"));

        let guard = driver.enter("a1");
        assert!(guard.is_some());
        assert!(driver.enter("a1").is_none());
        assert!(driver.cancel("a1"));
        drop(guard);
        assert!(!driver.is_running("a1"));
    }

    #[tokio::test]
    async fn test_warned_set_forgets_evicted_attempts() {
        use crate::domain::models::{FusionSignal, SignalSource};

        let clock = Arc::new(ManualClock::new(0));
        let driver = driver_with(Arc::new(MissingSource), Arc::clone(&clock));
        for id in ["a1", "a2"] {
            driver.engine.lock().await.ingest_signal(&FusionSignal::new(
                id,
                "chatgpt",
                SignalSource::Network,
                LifecyclePhase::Streaming,
                0,
            ));
        }

        assert!(matches!(driver.run("a1").await, StabilizationOutcome::TimedOut { .. }));
        assert!(driver.warned.lock().unwrap().contains("a1"));

        {
            let mut engine = driver.engine.lock().await;
            engine.dispose("a1");
            engine.maintain(10_000_000);
            assert!(engine.attempt("a1").is_none());
        }

        assert!(matches!(driver.run("a2").await, StabilizationOutcome::TimedOut { .. }));
        let warned = driver.warned.lock().unwrap();
        assert_eq!(warned.len(), 1);
        assert!(warned.contains("a2"));
    }
}
