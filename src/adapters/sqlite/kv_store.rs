use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::warn;

use crate::domain::errors::LeaseStoreError;
use crate::domain::ports::LeaseStore;

/// Lease store persisted in the `kv_store` table.
///
/// Every process pointing at the same database file shares the records,
/// which is what lets independent watchers see each other's probe leases.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, LeaseStoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(raw,)| serde_json::from_str(&raw))
            .transpose()
            .map_err(LeaseStoreError::from)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), LeaseStoreError> {
        let raw = serde_json::to_string(&value)?;
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), LeaseStoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Option<HashMap<String, Value>>, LeaseStoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM kv_store")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = HashMap::with_capacity(rows.len());
        for (key, raw) in rows {
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    entries.insert(key, value);
                }
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable kv_store row"),
            }
        }
        Ok(Some(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    async fn setup_store() -> SqliteKeyValueStore {
        let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
        SqliteKeyValueStore::new(pool)
    }

    #[tokio::test]
    async fn test_set_and_get_value() {
        let store = setup_store().await;
        let value = json!({"attemptId": "a1", "expiresAtMs": 5000, "updatedAtMs": 0});
        store.set("probe_lease:c1", value.clone()).await.unwrap();

        assert_eq!(store.get("probe_lease:c1").await.unwrap(), Some(value));
        assert!(store.get("probe_lease:c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = setup_store().await;
        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.get_all().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = setup_store().await;
        store.set("k", json!("v")).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_value_surfaces_as_serialization_error() {
        let store = setup_store().await;
        sqlx::query("INSERT INTO kv_store (key, value) VALUES ('bad', '{not json')")
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(store.get("bad").await, Err(LeaseStoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_get_all_skips_unreadable_rows() {
        let store = setup_store().await;
        store.set("probe_lease:c1", json!({"attemptId": "a1"})).await.unwrap();
        sqlx::query("INSERT INTO kv_store (key, value) VALUES ('probe_lease:c2', '{not json')")
            .execute(&store.pool)
            .await
            .unwrap();

        let entries = store.get_all().await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("probe_lease:c1"), Some(&json!({"attemptId": "a1"})));
    }
}
