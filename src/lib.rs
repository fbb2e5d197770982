//! Offline cache and background synchronization layer for the Plenna
//! client.
//!
//! Reads are served from a local persistent store immediately and
//! reconciled against the remote API in the background; writes apply
//! optimistically and are retried with exponential backoff until the
//! remote service confirms them or retries run out. The storage engine
//! and the connectivity signal are injected, so the whole layer runs
//! unchanged against SQLite in the app and an in-memory engine in tests.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

#[doc(hidden)]
pub mod test_support;

pub use application::ports::{
    BatchOp, ChannelConnectivity, ConnectivityEvent, ConnectivityPublisher, ConnectivitySource,
    RemoteService, StorageEngine,
};
pub use application::services::{
    ChatCacheService, ChatStorageStats, CleanupReport, NetworkMonitor, OfflineStatus,
    ReindexReport, ResponseCache, StatusBroadcaster, SyncParticipant, SyncPassReport,
    SyncQueueService,
};
pub use domain::collections;
pub use domain::entities::{
    CachedMessage, ConversationSummary, LocalRef, MessageDraft, MessagePreview,
    MutationDescriptor, MutationKind, PendingMutation, RecordDraft, StorageFootprint, StoredRecord,
};
pub use domain::value_objects::{EndpointKey, SyncState};
pub use infrastructure::storage::{MemoryStorageEngine, SqliteStorageEngine};
pub use shared::config::{
    ChatCacheConfig, DatabaseConfig, MonitorConfig, OfflineConfig, ResponseCacheConfig, SyncConfig,
};
pub use shared::error::{CacheError, Result};
pub use state::OfflineCache;
