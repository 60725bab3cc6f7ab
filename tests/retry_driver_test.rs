//! Stabilization retry driver against scripted canonical sources.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use capture_fusion::domain::models::{LeaseConfig, RetryConfig};
use capture_fusion::domain::ports::{Clock, ManualClock};
use capture_fusion::services::StabilizationEvent;
use capture_fusion::{
    CanonicalSample, CanonicalSampleSource, Config, InMemoryLeaseStore, LifecyclePhase,
    ProbeLeaseCoordinator, SampleReadiness, SignalFusionEngine, SourceError,
    StabilizationOutcome, StabilizationRetryDriver,
};
use common::{signal, terminal_sample, PLATFORM};
use tokio::sync::{mpsc, Mutex};

/// What the scripted source does on one fetch.
#[derive(Clone)]
enum Fetch {
    Sample { hash: &'static str, ready: bool },
    Missing,
    Fail,
}

/// Plays back a fetch script, advancing the manual clock before every fetch.
struct ScriptedSource {
    clock: Arc<ManualClock>,
    step_ms: i64,
    script: StdMutex<VecDeque<Fetch>>,
    fallback: Fetch,
    degraded: Option<CanonicalSample>,
}

impl ScriptedSource {
    fn new(clock: &Arc<ManualClock>, step_ms: i64, script: Vec<Fetch>, fallback: Fetch) -> Self {
        Self {
            clock: Arc::clone(clock),
            step_ms,
            script: StdMutex::new(script.into()),
            fallback,
            degraded: None,
        }
    }

    fn with_degraded(mut self, sample: CanonicalSample) -> Self {
        self.degraded = Some(sample);
        self
    }
}

#[async_trait]
impl CanonicalSampleSource for ScriptedSource {
    async fn fetch_canonical(&self, attempt_id: &str) -> Result<Option<CanonicalSample>, SourceError> {
        let ts = self.clock.advance(self.step_ms);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match next {
            Fetch::Sample { hash, ready } => {
                let readiness = if ready {
                    SampleReadiness::terminal(hash)
                } else {
                    SampleReadiness::in_progress("streaming")
                };
                Ok(Some(CanonicalSample::new(attempt_id, PLATFORM, "c1", ts, readiness)))
            }
            Fetch::Missing => Ok(None),
            Fetch::Fail => Err(SourceError::Unreachable("backend returned 503".to_string())),
        }
    }

    async fn degraded_sample(&self, _attempt_id: &str) -> Option<CanonicalSample> {
        self.degraded.clone()
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    engine: Arc<Mutex<SignalFusionEngine>>,
    leases: Arc<ProbeLeaseCoordinator>,
}

impl Harness {
    async fn new(config: &Config) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = Arc::new(Mutex::new(SignalFusionEngine::with_config(
            config,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )));
        engine
            .lock()
            .await
            .ingest_signal(&signal("a1", LifecyclePhase::CompletedHint, 1_000).with_conversation("c1"));
        let leases = Arc::new(ProbeLeaseCoordinator::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            LeaseConfig::default(),
        ));
        Self { clock, engine, leases }
    }

    fn driver(&self, source: ScriptedSource, retry: RetryConfig) -> StabilizationRetryDriver {
        StabilizationRetryDriver::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.leases),
            Arc::new(source),
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            retry,
        )
    }
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        retry_delay_ms: 1,
        max_retries,
        timeout_grace_ms: 1_000_000,
        degraded_promotion_failures: 2,
    }
}

#[tokio::test]
async fn test_driver_captures_after_stable_samples_and_releases_lease() {
    let harness = Harness::new(&Config::default()).await;
    let source = ScriptedSource::new(
        &harness.clock,
        600,
        vec![Fetch::Sample { hash: "h1", ready: false }],
        Fetch::Sample { hash: "h1", ready: true },
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let driver = harness.driver(source, fast_retry(6)).with_events(tx);

    assert_eq!(driver.run("a1").await, StabilizationOutcome::Captured);
    assert!(harness.engine.lock().await.resolve("a1").ready);
    assert!(harness.leases.snapshot().await.is_empty());

    drop(driver);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(StabilizationEvent::Tick { retry: 1, .. })));
    assert_eq!(
        events.last(),
        Some(&StabilizationEvent::Finished {
            attempt_id: "a1".to_string(),
            outcome: StabilizationOutcome::Captured,
        })
    );
}

#[tokio::test]
async fn test_driver_times_out_when_content_keeps_changing() {
    let harness = Harness::new(&Config::default()).await;
    let source = ScriptedSource::new(
        &harness.clock,
        600,
        vec![
            Fetch::Sample { hash: "h1", ready: true },
            Fetch::Sample { hash: "h2", ready: true },
            Fetch::Sample { hash: "h3", ready: true },
        ],
        Fetch::Sample { hash: "h4", ready: false },
    );
    let driver = harness.driver(source, fast_retry(3));

    match driver.run("a1").await {
        StabilizationOutcome::TimedOut { retries, .. } => assert_eq!(retries, 3),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!harness.engine.lock().await.resolve("a1").ready);
    assert!(harness.leases.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_gate_timeout_restarts_recovery_once() {
    let mut config = Config::default();
    config.readiness.min_stable_ms = 1_000;
    config.readiness.max_stabilization_wait_ms = 1_000;
    let harness = Harness::new(&config).await;
    // Hash changes every fetch until the restart, then settles.
    let source = ScriptedSource::new(
        &harness.clock,
        600,
        vec![
            Fetch::Sample { hash: "h1", ready: true },
            Fetch::Sample { hash: "h2", ready: true },
            Fetch::Sample { hash: "h3", ready: true },
        ],
        Fetch::Sample { hash: "final", ready: true },
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let driver = harness.driver(source, fast_retry(10)).with_events(tx);

    assert_eq!(driver.run("a1").await, StabilizationOutcome::Captured);
    drop(driver);

    let mut restarts = 0;
    while let Some(event) = rx.recv().await {
        if matches!(event, StabilizationEvent::RecoveryRestarted { .. }) {
            restarts += 1;
        }
    }
    assert_eq!(restarts, 1);
}

#[tokio::test]
async fn test_degraded_sample_promoted_after_repeated_failures() {
    let harness = Harness::new(&Config::default()).await;
    let degraded = terminal_sample("a1", "c1", "dom-hash", 5_000);
    let source = ScriptedSource::new(&harness.clock, 100, vec![Fetch::Missing], Fetch::Fail)
        .with_degraded(degraded);
    let driver = harness.driver(source, fast_retry(6));

    assert_eq!(driver.run("a1").await, StabilizationOutcome::DegradedPromoted);
    let mut engine = harness.engine.lock().await;
    assert!(engine.resolve("a1").ready);
    assert_eq!(engine.captured_data("a1").unwrap().readiness.content_hash.as_deref(), Some("dom-hash"));
}

#[tokio::test]
async fn test_unready_degraded_sample_is_not_promoted() {
    let harness = Harness::new(&Config::default()).await;
    let degraded = CanonicalSample::new(
        "a1",
        PLATFORM,
        "c1",
        5_000,
        SampleReadiness::in_progress("dom still changing"),
    );
    let source = ScriptedSource::new(&harness.clock, 100, Vec::new(), Fetch::Fail).with_degraded(degraded);
    let driver = harness.driver(source, fast_retry(4));

    assert!(matches!(driver.run("a1").await, StabilizationOutcome::TimedOut { .. }));
    assert!(!harness.engine.lock().await.resolve("a1").ready);
}

#[tokio::test]
async fn test_lease_contention_defers_without_fetching() {
    let harness = Harness::new(&Config::default()).await;
    assert!(harness.leases.claim("c1", "other-tab", 60_000).await.acquired);

    let source = ScriptedSource::new(&harness.clock, 0, Vec::new(), Fetch::Sample { hash: "h1", ready: true });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let driver = harness.driver(source, fast_retry(3)).with_events(tx);

    assert!(matches!(driver.run("a1").await, StabilizationOutcome::TimedOut { retries: 3, .. }));
    drop(driver);

    let mut deferred = 0;
    while let Some(event) = rx.recv().await {
        match event {
            StabilizationEvent::LeaseDeferred { owner_attempt_id, .. } => {
                assert_eq!(owner_attempt_id.as_deref(), Some("other-tab"));
                deferred += 1;
            }
            StabilizationEvent::FetchFailed { .. } => panic!("fetched while deferred"),
            _ => {}
        }
    }
    assert_eq!(deferred, 3);
    assert_eq!(harness.leases.snapshot().await[0].1.attempt_id, "other-tab");
}

#[tokio::test]
async fn test_disposed_and_superseded_attempts_are_skipped() {
    let harness = Harness::new(&Config::default()).await;
    harness.engine.lock().await.dispose("a1");
    let source = ScriptedSource::new(&harness.clock, 0, Vec::new(), Fetch::Fail);
    let driver = harness.driver(source, fast_retry(3));

    assert_eq!(
        driver.run("a1").await,
        StabilizationOutcome::Skipped {
            phase: Some(LifecyclePhase::Disposed)
        }
    );

    harness
        .engine
        .lock()
        .await
        .ingest_signal(&signal("a2", LifecyclePhase::Streaming, 2_000).with_conversation("c2"));
    harness
        .engine
        .lock()
        .await
        .ingest_signal(&signal("a3", LifecyclePhase::PromptSent, 2_100).with_conversation("c2"));
    assert_eq!(
        driver.run("a2").await,
        StabilizationOutcome::Skipped {
            phase: Some(LifecyclePhase::Superseded)
        }
    );
}

#[tokio::test]
async fn test_overlapping_runs_are_rejected_and_cancel_stops_loop() {
    let harness = Harness::new(&Config::default()).await;
    let source = ScriptedSource::new(&harness.clock, 0, Vec::new(), Fetch::Missing);
    let mut retry = fast_retry(1_000);
    retry.retry_delay_ms = 5;
    retry.degraded_promotion_failures = u32::MAX;
    let driver = Arc::new(harness.driver(source, retry));

    let background = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.run("a1").await })
    };
    while !driver.is_running("a1") {
        tokio::task::yield_now().await;
    }

    assert_eq!(driver.run("a1").await, StabilizationOutcome::AlreadyRunning);
    assert!(driver.cancel("a1"));
    assert_eq!(background.await.unwrap(), StabilizationOutcome::Cancelled);
    assert!(!driver.is_running("a1"));
    assert!(harness.leases.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_run_all_drives_attempts_concurrently() {
    let harness = Harness::new(&Config::default()).await;
    let source = ScriptedSource::new(&harness.clock, 600, Vec::new(), Fetch::Sample { hash: "h1", ready: true });
    let driver = harness.driver(source, fast_retry(6));

    let results = driver.run_all(&["a1".to_string(), "ghost".to_string()]).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], ("a1".to_string(), StabilizationOutcome::Captured));
    assert_eq!(results[1], ("ghost".to_string(), StabilizationOutcome::Skipped { phase: None }));
}
