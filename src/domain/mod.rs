//! Domain layer for capture fusion
//!
//! This module contains the attempt lifecycle model, the wire records
//! exchanged with capture collaborators and the ports the services depend on.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{DomainError, DomainResult, LeaseStoreError, SourceError, WireError};
