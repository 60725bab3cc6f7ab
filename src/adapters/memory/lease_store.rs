use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::errors::LeaseStoreError;
use crate::domain::ports::LeaseStore;

/// Key/value lease store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with entries, e.g. records left behind by another process.
    pub fn with_entries(entries: HashMap<String, Value>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, LeaseStoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), LeaseStoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), LeaseStoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<Option<HashMap<String, Value>>, LeaseStoreError> {
        Ok(Some(self.entries.read().await.clone()))
    }
}
