//! Infrastructure layer module
//!
//! Ambient concerns shared by the services and the binary:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)

pub mod config;
pub mod logging;
