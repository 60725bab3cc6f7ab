//! Engine configuration loading.
//!
//! Defaults are layered under `.capture-fusion/*.yaml` and
//! `CAPTURE_FUSION_*` environment overrides, then validated before any
//! service is built.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
