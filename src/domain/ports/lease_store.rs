use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::LeaseStoreError;

/// Shared persistent key/value store consumed by the probe lease coordinator.
///
/// Values are JSON documents. Implementations must be safe to share between
/// coordinators running in different processes; the coordinator never
/// assumes it is the only writer.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read a single value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Value>, LeaseStoreError>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: Value) -> Result<(), LeaseStoreError>;

    /// Delete a key; deleting an absent key is not an error
    async fn remove(&self, key: &str) -> Result<(), LeaseStoreError>;

    /// Bulk read used for hydration
    ///
    /// Stores without a bulk listing return `Ok(None)`, in which case the
    /// coordinator relies on per-key reads only.
    async fn get_all(&self) -> Result<Option<HashMap<String, Value>>, LeaseStoreError> {
        Ok(None)
    }
}
