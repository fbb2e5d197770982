use crate::application::ports::StorageEngine;
use crate::domain::collections;
use crate::domain::entities::RecordDraft;
use crate::domain::value_objects::{EndpointKey, SyncState};
use crate::shared::config::ResponseCacheConfig;
use crate::shared::error::{CacheError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const RESPONSE_TYPE: &str = "api_response";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseEnvelope {
    value: Value,
    expires_at: i64,
}

/// Time-boxed memoization of remote read results, keyed by normalized
/// endpoint path and persisted through the store so entries survive a
/// restart.
pub struct ResponseCache {
    engine: Arc<dyn StorageEngine>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(engine: Arc<dyn StorageEngine>, config: &ResponseCacheConfig) -> Self {
        Self {
            engine,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    /// Returns the cached value, or `None` for a miss, an expired entry
    /// (evicted on the way out) or a store failure — reads never propagate
    /// errors.
    pub async fn get(&self, key: &EndpointKey) -> Option<Value> {
        let record = match self
            .engine
            .get(collections::API_RESPONSE_CACHE, key.as_str())
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                warn!(target: "offline::responses", key = %key, error = %err, "response cache read failed");
                return None;
            }
        };

        let envelope: ResponseEnvelope = match record.decode() {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "offline::responses", key = %key, error = %err, "evicting undecodable response entry");
                self.evict(key).await;
                return None;
            }
        };

        if Utc::now().timestamp_millis() > envelope.expires_at {
            self.evict(key).await;
            return None;
        }

        Some(envelope.value)
    }

    pub async fn put(&self, key: &EndpointKey, value: Value, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let envelope = ResponseEnvelope {
            value,
            expires_at: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
        };
        let draft = RecordDraft::encode(RESPONSE_TYPE, key.as_str(), &envelope, SyncState::Synced)?;
        self.engine
            .put(collections::API_RESPONSE_CACHE, draft)
            .await?;
        Ok(())
    }

    /// Drops every entry whose key starts with the given normalized
    /// prefix; used after a mutation invalidates a family of reads.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u32> {
        let normalized = EndpointKey::from_path(prefix);
        let entries = self
            .engine
            .get_all(collections::API_RESPONSE_CACHE)
            .await?;

        let mut removed = 0u32;
        for entry in entries {
            if entry.id.starts_with(normalized.as_str()) {
                if self
                    .engine
                    .delete(collections::API_RESPONSE_CACHE, &entry.id)
                    .await
                    .is_ok()
                {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Periodic sweep of expired entries.
    pub async fn purge_expired(&self) -> Result<u32> {
        let now = Utc::now().timestamp_millis();
        let entries = self
            .engine
            .get_all(collections::API_RESPONSE_CACHE)
            .await?;

        let mut removed = 0u32;
        for entry in entries {
            let expired = entry
                .decode::<ResponseEnvelope>()
                .map(|envelope| now > envelope.expires_at)
                .unwrap_or(true);
            if expired
                && self
                    .engine
                    .delete(collections::API_RESPONSE_CACHE, &entry.id)
                    .await
                    .is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn evict(&self, key: &EndpointKey) {
        if let Err(err) = self
            .engine
            .delete(collections::API_RESPONSE_CACHE, key.as_str())
            .await
        {
            if !matches!(err, CacheError::NotFound(_)) {
                warn!(target: "offline::responses", key = %key, error = %err, "response cache eviction failed");
            }
        }
    }
}
