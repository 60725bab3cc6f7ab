//! Probe lease records shared across tabs through a persistent store.

use serde::{Deserialize, Serialize};

/// Time-boxed claim over verification work for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeLeaseRecord {
    /// Current holder
    pub attempt_id: String,
    pub expires_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ProbeLeaseRecord {
    pub fn new(attempt_id: impl Into<String>, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            expires_at_ms: now_ms.saturating_add(ttl_ms),
            updated_at_ms: now_ms,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }

    pub fn is_held_by(&self, attempt_id: &str) -> bool {
        self.attempt_id == attempt_id
    }
}

/// Outcome of a lease claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseClaim {
    pub acquired: bool,
    pub owner_attempt_id: Option<String>,
    pub expires_at_ms: Option<i64>,
}

impl LeaseClaim {
    pub fn granted(record: &ProbeLeaseRecord) -> Self {
        Self {
            acquired: true,
            owner_attempt_id: Some(record.attempt_id.clone()),
            expires_at_ms: Some(record.expires_at_ms),
        }
    }

    pub fn contended(owner: &ProbeLeaseRecord) -> Self {
        Self {
            acquired: false,
            owner_attempt_id: Some(owner.attempt_id.clone()),
            expires_at_ms: Some(owner.expires_at_ms),
        }
    }

    /// Not acquired and no known owner (e.g. the write failed).
    pub fn refused() -> Self {
        Self {
            acquired: false,
            owner_attempt_id: None,
            expires_at_ms: None,
        }
    }
}
