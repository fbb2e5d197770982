use crate::domain::value_objects::SyncState;
use crate::shared::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached domain value plus sync metadata, as read back from a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub logical_type: String,
    pub payload: Value,
    pub cached_at: DateTime<Utc>,
    pub sync_state: SyncState,
}

impl StoredRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(CacheError::from)
    }
}

/// Insert-side shape of a record. `cached_at` is stamped by the engine on
/// every write; a missing id gets a synthesized one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordDraft {
    pub id: Option<String>,
    pub logical_type: String,
    pub payload: Value,
    pub sync_state: SyncState,
}

impl RecordDraft {
    pub fn new(logical_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            logical_type: logical_type.into(),
            payload,
            sync_state: SyncState::Synced,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_sync_state(mut self, sync_state: SyncState) -> Self {
        self.sync_state = sync_state;
        self
    }

    /// Serializes a domain value into a draft carrying its id.
    pub fn encode<T: Serialize>(
        logical_type: &str,
        id: impl Into<String>,
        value: &T,
        sync_state: SyncState,
    ) -> Result<Self> {
        Ok(Self {
            id: Some(id.into()),
            logical_type: logical_type.to_string(),
            payload: serde_json::to_value(value)?,
            sync_state,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionFootprint {
    pub collection: String,
    pub record_count: u64,
    pub approx_bytes: u64,
}

/// Approximate on-device size, computed by serializing each collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageFootprint {
    pub per_collection: Vec<CollectionFootprint>,
    pub total_bytes: u64,
}

impl StorageFootprint {
    pub fn record_count(&self, collection: &str) -> u64 {
        self.per_collection
            .iter()
            .find(|c| c.collection == collection)
            .map(|c| c.record_count)
            .unwrap_or(0)
    }
}
