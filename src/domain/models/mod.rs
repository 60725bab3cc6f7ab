pub mod attempt;
pub mod config;
pub mod lease;
pub mod resolution;
pub mod signal;

pub use attempt::{AttemptDescriptor, CreateAttemptInput, LifecyclePhase};
pub use config::{
    Config, EngineConfig, LeaseConfig, LoggingConfig, ReadinessConfig, RetryConfig, TrackerConfig,
};
pub use lease::{LeaseClaim, ProbeLeaseRecord};
pub use resolution::{BlockingCondition, CaptureResolution, ResolutionReason};
pub use signal::{CanonicalSample, FusionMessage, FusionSignal, SampleReadiness, SignalSource};
