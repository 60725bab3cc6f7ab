pub mod attempt_tracker;
pub mod fusion_engine;
pub mod ingest_channel;
pub mod probe_lease;
pub mod readiness_gate;
pub mod stabilization_retry;

pub use attempt_tracker::AttemptTracker;
pub use fusion_engine::{EngineStats, MaintenanceReport, SignalFusionEngine};
pub use ingest_channel::{FusionIngestor, IngestOutcome};
pub use probe_lease::ProbeLeaseCoordinator;
pub use readiness_gate::{GateVerdict, ReadinessGate};
pub use stabilization_retry::{StabilizationEvent, StabilizationOutcome, StabilizationRetryDriver};
