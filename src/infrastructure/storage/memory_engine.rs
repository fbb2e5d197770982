use crate::application::ports::storage_engine::{BatchOp, StorageEngine};
use crate::domain::entities::{CollectionFootprint, RecordDraft, StorageFootprint, StoredRecord};
use crate::domain::value_objects::SyncState;
use crate::shared::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory storage engine with the same semantics as the SQLite one.
/// Used by tests and by hosts running in a degraded, cache-disabled mode
/// after a fatal store failure.
pub struct MemoryStorageEngine {
    collections: RwLock<HashMap<String, HashMap<String, StoredRecord>>>,
}

impl MemoryStorageEngine {
    pub fn new(collections: &[String]) -> Self {
        let map = collections
            .iter()
            .map(|name| (name.clone(), HashMap::new()))
            .collect();
        Self {
            collections: RwLock::new(map),
        }
    }

    fn materialize(draft: RecordDraft) -> StoredRecord {
        StoredRecord {
            id: draft
                .id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            logical_type: draft.logical_type,
            payload: draft.payload,
            cached_at: Utc::now(),
            sync_state: draft.sync_state,
        }
    }
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn put(&self, collection: &str, draft: RecordDraft) -> Result<String> {
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| CacheError::UnknownCollection(collection.to_string()))?;
        let record = Self::materialize(draft);
        let id = record.id.clone();
        records.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        let collections = self.collections.read().await;
        let records = collections
            .get(collection)
            .ok_or_else(|| CacheError::UnknownCollection(collection.to_string()))?;
        Ok(records.get(id).cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredRecord>> {
        let collections = self.collections.read().await;
        let records = collections
            .get(collection)
            .ok_or_else(|| CacheError::UnknownCollection(collection.to_string()))?;
        Ok(records.values().cloned().collect())
    }

    async fn get_by_sync_state(
        &self,
        collection: &str,
        state: SyncState,
    ) -> Result<Vec<StoredRecord>> {
        let all = self.get_all(collection).await?;
        Ok(all.into_iter().filter(|r| r.sync_state == state).collect())
    }

    async fn set_sync_state(&self, collection: &str, id: &str, state: SyncState) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| CacheError::UnknownCollection(collection.to_string()))?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(format!("{collection}/{id}")))?;
        record.sync_state = state;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| CacheError::UnknownCollection(collection.to_string()))?;
        records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CacheError::NotFound(format!("{collection}/{id}")))
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| CacheError::UnknownCollection(collection.to_string()))?;
        records.clear();
        Ok(())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut collections = self.collections.write().await;

        // Validate every op against the configured collections before
        // touching anything; the ops themselves cannot fail afterwards,
        // which makes the batch all-or-nothing under the single write lock.
        for op in &ops {
            if !collections.contains_key(op.collection()) {
                return Err(CacheError::UnknownCollection(op.collection().to_string()));
            }
        }

        for op in ops {
            match op {
                BatchOp::Put { collection, draft } => {
                    let record = Self::materialize(draft);
                    collections
                        .get_mut(&collection)
                        .expect("validated above")
                        .insert(record.id.clone(), record);
                }
                BatchOp::Delete { collection, id } => {
                    collections
                        .get_mut(&collection)
                        .expect("validated above")
                        .remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn storage_footprint(&self) -> Result<StorageFootprint> {
        let collections = self.collections.read().await;
        let mut per_collection: Vec<CollectionFootprint> = Vec::new();
        for (name, records) in collections.iter() {
            let mut bytes = 0u64;
            for record in records.values() {
                bytes += serde_json::to_string(&record.payload)
                    .map(|s| s.len() as u64)
                    .unwrap_or(0);
            }
            per_collection.push(CollectionFootprint {
                collection: name.clone(),
                record_count: records.len() as u64,
                approx_bytes: bytes,
            });
        }
        per_collection.sort_by(|a, b| a.collection.cmp(&b.collection));

        let total_bytes = per_collection.iter().map(|c| c.approx_bytes).sum();
        Ok(StorageFootprint {
            per_collection,
            total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collections;
    use serde_json::json;

    fn engine() -> MemoryStorageEngine {
        MemoryStorageEngine::new(&collections::base_collections())
    }

    #[tokio::test]
    async fn put_stamps_cached_at_on_replace() {
        let engine = engine();
        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new("message", json!({"v": 1})).with_id("m1"),
            )
            .await
            .unwrap();
        let first = engine
            .get(collections::MESSAGES, "m1")
            .await
            .unwrap()
            .unwrap();

        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new("message", json!({"v": 2})).with_id("m1"),
            )
            .await
            .unwrap();
        let second = engine
            .get(collections::MESSAGES, "m1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.payload, json!({"v": 2}));
        assert!(second.cached_at >= first.cached_at);
    }

    #[tokio::test]
    async fn unknown_collection_is_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.get_all("bookings").await,
            Err(CacheError::UnknownCollection(_))
        ));
    }

    #[tokio::test]
    async fn batch_rejecting_unknown_collection_applies_nothing() {
        let engine = engine();
        let ops = vec![
            BatchOp::put(
                collections::MESSAGES,
                RecordDraft::new("message", json!({})).with_id("m1"),
            ),
            BatchOp::delete("bookings", "b1"),
        ];
        assert!(engine.apply_batch(ops).await.is_err());
        assert!(engine
            .get(collections::MESSAGES, "m1")
            .await
            .unwrap()
            .is_none());
    }
}
