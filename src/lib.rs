//! Capture Fusion - lifecycle signal fusion for chat response capture
//!
//! Fuses noisy lifecycle hints (network interception, DOM observation,
//! completion heuristics) with authoritative canonical samples into a single
//! capture decision per attempt. An attempt is only reported ready after two
//! canonical samples agree across a stabilization window; every other input
//! can at most move the attempt along its lifecycle.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): attempt tracker, readiness gate, fusion
//!   engine, probe lease coordinator, retry driver and ingestor
//! - **Adapters** (`adapters`): in-memory and SQLite lease stores
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): replay, lease and config commands
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use capture_fusion::{
//!     CanonicalSample, Config, FusionSignal, LifecyclePhase, ManualClock, SampleReadiness,
//!     SignalFusionEngine, SignalSource,
//! };
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let mut engine = SignalFusionEngine::with_config(&Config::default(), clock);
//!
//! engine.ingest_signal(
//!     &FusionSignal::new("a1", "chatgpt", SignalSource::Network, LifecyclePhase::Streaming, 100)
//!         .with_conversation("c1"),
//! );
//! let sample = |ts| CanonicalSample::new("a1", "chatgpt", "c1", ts, SampleReadiness::terminal("h1"));
//! assert!(!engine.apply_canonical_sample(&sample(1_000)).ready);
//! assert!(engine.apply_canonical_sample(&sample(2_000)).ready);
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::memory::InMemoryLeaseStore;
pub use adapters::sqlite::SqliteKeyValueStore;
pub use domain::errors::{DomainError, DomainResult, LeaseStoreError, SourceError, WireError};
pub use domain::models::{
    AttemptDescriptor, BlockingCondition, CanonicalSample, CaptureResolution, Config,
    FusionMessage, FusionSignal, LeaseClaim, LifecyclePhase, ProbeLeaseRecord, ResolutionReason,
    SampleReadiness, SignalSource,
};
pub use domain::ports::{
    CanonicalSampleSource, Clock, LeaseStore, ManualClock, ProbeScheduler, SystemClock,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    FusionIngestor, IngestOutcome, ProbeLeaseCoordinator, SignalFusionEngine,
    StabilizationOutcome, StabilizationRetryDriver,
};
