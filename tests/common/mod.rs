//! Common test utilities for integration tests
//!
//! Provides shared fixtures and builders used across the integration test
//! files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use capture_fusion::domain::ports::{Clock, InMemoryProbeScheduler, ManualClock, ProbeScheduler};
use capture_fusion::{
    CanonicalSample, Config, FusionSignal, LifecyclePhase, SampleReadiness, SignalFusionEngine,
    SignalSource,
};
use tempfile::TempDir;

pub const PLATFORM: &str = "chatgpt";

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("leases.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Engine over a manual clock and a recording probe scheduler.
pub struct EngineFixture {
    pub clock: Arc<ManualClock>,
    pub probes: Arc<InMemoryProbeScheduler>,
    pub engine: SignalFusionEngine,
}

impl EngineFixture {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let probes = Arc::new(InMemoryProbeScheduler::new());
        let engine = SignalFusionEngine::new(
            config,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&probes) as Arc<dyn ProbeScheduler>,
        );
        Self { clock, probes, engine }
    }
}

pub fn signal(attempt_id: &str, phase: LifecyclePhase, timestamp_ms: i64) -> FusionSignal {
    FusionSignal::new(attempt_id, PLATFORM, SignalSource::Network, phase, timestamp_ms)
}

pub fn terminal_sample(attempt_id: &str, conversation_id: &str, hash: &str, timestamp_ms: i64) -> CanonicalSample {
    CanonicalSample::new(
        attempt_id,
        PLATFORM,
        conversation_id,
        timestamp_ms,
        SampleReadiness::terminal(hash),
    )
}

pub fn streaming_sample(attempt_id: &str, conversation_id: &str, timestamp_ms: i64) -> CanonicalSample {
    CanonicalSample::new(
        attempt_id,
        PLATFORM,
        conversation_id,
        timestamp_ms,
        SampleReadiness::in_progress("assistant message still streaming"),
    )
}

/// Every phase, for property tests.
pub const ALL_PHASES: [LifecyclePhase; 10] = [
    LifecyclePhase::Idle,
    LifecyclePhase::PromptSent,
    LifecyclePhase::Streaming,
    LifecyclePhase::CompletedHint,
    LifecyclePhase::CanonicalProbing,
    LifecyclePhase::CapturedReady,
    LifecyclePhase::TerminatedPartial,
    LifecyclePhase::Error,
    LifecyclePhase::Superseded,
    LifecyclePhase::Disposed,
];
