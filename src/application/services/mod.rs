pub mod chat_cache;
pub mod network_monitor;
pub mod response_cache;
pub mod status;
pub mod sync_queue;

pub use chat_cache::{ChatCacheService, ChatStorageStats, CleanupReport};
pub use network_monitor::{NetworkMonitor, SyncParticipant};
pub use response_cache::ResponseCache;
pub use status::{OfflineStatus, StatusBroadcaster};
pub use sync_queue::{ReindexReport, SyncPassReport, SyncQueueService};
