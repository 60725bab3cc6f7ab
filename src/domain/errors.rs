//! Domain errors for the capture fusion engine.
//!
//! Expected conditions (disposal, regressive signals, lease contention) are
//! returned as data, not errors. These types cover the edges: malformed wire
//! payloads, lease store I/O and canonical fetch failures.

use thiserror::Error;

/// Rejection of an inbound fusion payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Failure of the persistent key/value store behind the probe lease.
#[derive(Debug, Error)]
pub enum LeaseStoreError {
    #[error("Lease store I/O failed: {0}")]
    Io(String),

    #[error("Lease record serialization failed: {0}")]
    Serialization(String),

    #[error("Lease store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for LeaseStoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LeaseStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure to obtain a canonical sample from the platform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Canonical endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Canonical payload could not be parsed: {0}")]
    Parse(String),

    #[error("No canonical data for conversation {0}")]
    NotFound(String),
}

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Rejected payload: {0}")]
    Wire(#[from] WireError),

    #[error("Lease store error: {0}")]
    LeaseStore(#[from] LeaseStoreError),

    #[error("Canonical source error: {0}")]
    Source(#[from] SourceError),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
