//! Cross-tab probe lease coordinator.
//!
//! Optimistic, TTL-bounded mutual exclusion over verification work for a
//! conversation. Records live in a shared [`LeaseStore`] so several
//! processes watching the same conversation avoid probing it twice. This is
//! not a distributed lock: a crashed holder simply lets its lease expire.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::models::config::{millis, LeaseConfig};
use crate::domain::models::{LeaseClaim, ProbeLeaseRecord};
use crate::domain::ports::{Clock, LeaseStore};

#[derive(Debug, Default)]
struct LeaseCache {
    hydrated: bool,
    /// Keyed by conversation id
    records: HashMap<String, ProbeLeaseRecord>,
}

pub struct ProbeLeaseCoordinator {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
    cache: Mutex<LeaseCache>,
}

impl ProbeLeaseCoordinator {
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, config: LeaseConfig) -> Self {
        Self {
            store,
            clock,
            config,
            cache: Mutex::new(LeaseCache::default()),
        }
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.config.ttl_ms
    }

    /// Claim or refresh the lease on `conversation_id` for `attempt_id`.
    pub async fn claim(&self, conversation_id: &str, attempt_id: &str, ttl_ms: u64) -> LeaseClaim {
        let mut cache = self.cache.lock().await;
        let now = self.clock.now_ms();

        self.hydrate(&mut cache).await;
        self.refresh(&mut cache, conversation_id).await;
        self.prune_expired(&mut cache, now).await;

        if let Some(owner) = cache.records.get(conversation_id) {
            if !owner.is_held_by(attempt_id) {
                debug!(
                    conversation_id,
                    attempt_id,
                    owner = %owner.attempt_id,
                    "probe lease held by another attempt"
                );
                return LeaseClaim::contended(owner);
            }
        }

        let record = ProbeLeaseRecord::new(attempt_id, now, millis(ttl_ms));
        let previous = cache
            .records
            .insert(conversation_id.to_string(), record.clone());

        let write = match serde_json::to_value(&record) {
            Ok(value) => self.store.set(&self.key(conversation_id), value).await,
            Err(err) => Err(err.into()),
        };

        if let Err(err) = write {
            warn!(conversation_id, attempt_id, error = %err, "probe lease write failed, rolling back");
            match previous {
                Some(previous) => {
                    cache.records.insert(conversation_id.to_string(), previous);
                }
                None => {
                    cache.records.remove(conversation_id);
                }
            }
            return LeaseClaim::refused();
        }

        self.evict_over_capacity(&mut cache);
        info!(conversation_id, attempt_id, expires_at_ms = record.expires_at_ms, "probe lease granted");
        LeaseClaim::granted(&record)
    }

    /// Release the lease if `attempt_id` holds it.
    pub async fn release(&self, conversation_id: &str, attempt_id: &str) -> bool {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache, conversation_id).await;

        let held = cache
            .records
            .get(conversation_id)
            .is_some_and(|record| record.is_held_by(attempt_id));
        if !held {
            return false;
        }

        cache.records.remove(conversation_id);
        if let Err(err) = self.store.remove(&self.key(conversation_id)).await {
            warn!(conversation_id, attempt_id, error = %err, "probe lease removal not persisted");
        }
        debug!(conversation_id, attempt_id, "probe lease released");
        true
    }

    /// Live lease records, sorted by conversation id.
    pub async fn snapshot(&self) -> Vec<(String, ProbeLeaseRecord)> {
        let mut cache = self.cache.lock().await;
        self.hydrate(&mut cache).await;
        let now = self.clock.now_ms();

        let mut live: Vec<(String, ProbeLeaseRecord)> = cache
            .records
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .map(|(conversation_id, record)| (conversation_id.clone(), record.clone()))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    pub async fn is_hydrated(&self) -> bool {
        self.cache.lock().await.hydrated
    }

    fn key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.config.key_prefix, conversation_id)
    }

    async fn hydrate(&self, cache: &mut LeaseCache) {
        if cache.hydrated {
            return;
        }

        match self.store.get_all().await {
            Ok(Some(entries)) => {
                for (key, value) in entries {
                    let Some(conversation_id) = key.strip_prefix(&self.config.key_prefix) else {
                        continue;
                    };
                    if let Some(record) = parse_record(&key, value) {
                        cache.records.insert(conversation_id.to_string(), record);
                    }
                }
                cache.hydrated = true;
            }
            Ok(None) => cache.hydrated = true,
            Err(err) => {
                warn!(error = %err, "probe lease hydration failed, will retry");
            }
        }
    }

    /// Re-read one key so claims written by other processes are observed.
    async fn refresh(&self, cache: &mut LeaseCache, conversation_id: &str) {
        let key = self.key(conversation_id);
        match self.store.get(&key).await {
            Ok(Some(value)) => match parse_record(&key, value) {
                Some(record) => {
                    cache.records.insert(conversation_id.to_string(), record);
                }
                None => {
                    cache.records.remove(conversation_id);
                }
            },
            Ok(None) => {
                cache.records.remove(conversation_id);
            }
            Err(err) => {
                debug!(conversation_id, error = %err, "probe lease refresh failed, using cached record");
            }
        }
    }

    /// Drop locally expired records.
    ///
    /// Another process may have renewed any of them since this cache last
    /// read it, so each key is re-read first; only a store record that is
    /// still the same expired grant gets deleted.
    async fn prune_expired(&self, cache: &mut LeaseCache, now: i64) {
        let expired: Vec<(String, ProbeLeaseRecord)> = cache
            .records
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(conversation_id, record)| (conversation_id.clone(), record.clone()))
            .collect();

        for (conversation_id, cached) in expired {
            let key = self.key(&conversation_id);
            let stored = match self.store.get(&key).await {
                Ok(value) => value.and_then(|value| parse_record(&key, value)),
                Err(err) => {
                    debug!(conversation_id = %conversation_id, error = %err, "expired probe lease not re-read, dropping from cache only");
                    cache.records.remove(&conversation_id);
                    continue;
                }
            };

            match stored {
                Some(record) if !record.is_expired(now) => {
                    debug!(conversation_id = %conversation_id, owner = %record.attempt_id, "probe lease renewed elsewhere");
                    cache.records.insert(conversation_id, record);
                }
                Some(record) => {
                    cache.records.remove(&conversation_id);
                    if record == cached {
                        if let Err(err) = self.store.remove(&key).await {
                            debug!(conversation_id = %conversation_id, error = %err, "expired probe lease not removed from store");
                        }
                    }
                }
                None => {
                    cache.records.remove(&conversation_id);
                }
            }
        }
    }

    /// Soonest-to-expire records leave the cache first.
    fn evict_over_capacity(&self, cache: &mut LeaseCache) {
        let excess = cache.records.len().saturating_sub(self.config.max_entries);
        if excess == 0 {
            return;
        }

        let mut by_expiry: Vec<(i64, String)> = cache
            .records
            .iter()
            .map(|(conversation_id, record)| (record.expires_at_ms, conversation_id.clone()))
            .collect();
        by_expiry.sort();
        for (_, conversation_id) in by_expiry.into_iter().take(excess) {
            cache.records.remove(&conversation_id);
        }
    }
}

fn parse_record(key: &str, value: Value) -> Option<ProbeLeaseRecord> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(err) => {
            debug!(key, error = %err, "ignoring unreadable probe lease record");
            None
        }
    }
}
