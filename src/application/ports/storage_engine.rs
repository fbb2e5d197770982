use crate::domain::entities::{RecordDraft, StorageFootprint, StoredRecord};
use crate::domain::value_objects::SyncState;
use crate::shared::error::Result;
use async_trait::async_trait;

/// One step of an atomic batch. Batch deletes are lenient about missing
/// ids so a swap can run against a slice another writer already pruned.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        collection: String,
        draft: RecordDraft,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchOp {
    pub fn put(collection: impl Into<String>, draft: RecordDraft) -> Self {
        BatchOp::Put {
            collection: collection.into(),
            draft,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        BatchOp::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            BatchOp::Put { collection, .. } => collection,
            BatchOp::Delete { collection, .. } => collection,
        }
    }
}

/// Durable CRUD over named collections, fixed at open time.
///
/// Every operation fails with `UnknownCollection` for a name that was not
/// part of the open-time configuration. `cached_at` is stamped to now on
/// every put. `apply_batch` is the transactional primitive the services
/// build copy-then-swap and atomic promotion on: either every op commits
/// or none does.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Inserts or replaces a record, returning its id (synthesized when the
    /// draft carries none).
    async fn put(&self, collection: &str, draft: RecordDraft) -> Result<String>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>>;

    /// Unordered; callers sort when order matters.
    async fn get_all(&self, collection: &str) -> Result<Vec<StoredRecord>>;

    /// Index lookup by sync state. The index key is the state's integer
    /// code; taking the enum here is what keeps boolean keys out of the
    /// index.
    async fn get_by_sync_state(&self, collection: &str, state: SyncState)
        -> Result<Vec<StoredRecord>>;

    /// Fails with `NotFound` when the record does not exist.
    async fn set_sync_state(&self, collection: &str, id: &str, state: SyncState) -> Result<()>;

    async fn mark_synced(&self, collection: &str, id: &str) -> Result<()> {
        self.set_sync_state(collection, id, SyncState::Synced).await
    }

    /// Fails with `NotFound` when the record does not exist.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    async fn clear(&self, collection: &str) -> Result<()>;

    /// Applies all ops atomically, or none of them.
    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Approximate, computed by serializing each collection.
    async fn storage_footprint(&self) -> Result<StorageFootprint>;

    /// Releases underlying resources. Idempotent.
    async fn close(&self) {}
}
