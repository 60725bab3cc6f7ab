use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for capture fusion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Stabilization gate configuration
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Attempt bookkeeping bounds
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Resolution cache bounds
    #[serde(default)]
    pub engine: EngineConfig,

    /// Cross-tab probe lease configuration
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Stabilization retry driver configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Two-sample stabilization window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReadinessConfig {
    /// Minimum time the same content hash must persist before it is trusted
    #[serde(default = "default_min_stable_ms")]
    pub min_stable_ms: u64,

    /// Window after the first terminal sample before stabilization times out
    #[serde(default = "default_max_stabilization_wait_ms")]
    pub max_stabilization_wait_ms: u64,
}

const fn default_min_stable_ms() -> u64 {
    1000
}

const fn default_max_stabilization_wait_ms() -> u64 {
    15_000
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_stable_ms: default_min_stable_ms(),
            max_stabilization_wait_ms: default_max_stabilization_wait_ms(),
        }
    }
}

/// Attempt tracker eviction policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrackerConfig {
    /// Population bound; only settled or disposed attempts are evicted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Idle time after which a settled attempt is swept
    #[serde(default = "default_attempt_ttl_ms")]
    pub attempt_ttl_ms: u64,
}

const fn default_max_attempts() -> usize {
    200
}

const fn default_attempt_ttl_ms() -> u64 {
    600_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_ttl_ms: default_attempt_ttl_ms(),
        }
    }
}

/// Resolution cache pruning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    #[serde(default = "default_max_resolutions")]
    pub max_resolutions: usize,

    /// Age after which terminal resolutions are dropped
    #[serde(default = "default_resolution_ttl_ms")]
    pub resolution_ttl_ms: u64,

    /// Minimum interval between two pruning passes
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,
}

const fn default_max_resolutions() -> usize {
    500
}

const fn default_resolution_ttl_ms() -> u64 {
    600_000
}

const fn default_prune_interval_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_resolutions: default_max_resolutions(),
            resolution_ttl_ms: default_resolution_ttl_ms(),
            prune_interval_ms: default_prune_interval_ms(),
        }
    }
}

/// Probe lease configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LeaseConfig {
    /// Default lease duration in milliseconds
    #[serde(default = "default_lease_ttl_ms")]
    pub ttl_ms: u64,

    /// Maximum cached lease records
    #[serde(default = "default_lease_max_entries")]
    pub max_entries: usize,

    /// Store key prefix; the conversation id is appended
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Path to the `SQLite` lease database
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

const fn default_lease_ttl_ms() -> u64 {
    5000
}

const fn default_lease_max_entries() -> usize {
    256
}

fn default_key_prefix() -> String {
    "probe_lease:".to_string()
}

fn default_database_path() -> String {
    ".capture-fusion/leases.db".to_string()
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_lease_ttl_ms(),
            max_entries: default_lease_max_entries(),
            key_prefix: default_key_prefix(),
            database_path: default_database_path(),
        }
    }
}

/// Stabilization retry driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Delay between two ticks
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum number of ticks before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Extra time allowed past `retry_delay_ms * max_retries`
    #[serde(default = "default_timeout_grace_ms")]
    pub timeout_grace_ms: u64,

    /// Consecutive failed canonical fetches before a degraded sample may be promoted
    #[serde(default = "default_degraded_promotion_failures")]
    pub degraded_promotion_failures: u32,
}

const fn default_retry_delay_ms() -> u64 {
    1500
}

const fn default_max_retries() -> u32 {
    6
}

const fn default_timeout_grace_ms() -> u64 {
    3000
}

const fn default_degraded_promotion_failures() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            timeout_grace_ms: default_timeout_grace_ms(),
            degraded_promotion_failures: default_degraded_promotion_failures(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Clamp a configured millisecond span into the engine's signed clock domain.
pub fn millis(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
