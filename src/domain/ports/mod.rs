//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the fusion services depend on:
//! - Clock: injectable wall-clock time
//! - ProbeScheduler: start/cancel hook for verification probes
//! - LeaseStore: shared persistent key/value store behind the probe lease
//! - CanonicalSampleSource: canonical and degraded sample supplier

pub mod canonical_source;
pub mod clock;
pub mod lease_store;
pub mod probe_scheduler;

pub use canonical_source::CanonicalSampleSource;
pub use clock::{Clock, ManualClock, SystemClock};
pub use lease_store::LeaseStore;
pub use probe_scheduler::{InMemoryProbeScheduler, NullProbeScheduler, ProbeScheduler};
