use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    pub database: DatabaseConfig,
    pub chat: ChatCacheConfig,
    pub sync: SyncConfig,
    pub response_cache: ResponseCacheConfig,
    pub monitor: MonitorConfig,
    /// Domain collections the host app caches beyond the built-in set
    /// (bookings, notifications, ...). Contents are opaque to this crate.
    #[serde(default)]
    pub extra_collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCacheConfig {
    pub max_conversations: usize,
    pub max_messages_per_conversation: usize,
    pub background_sync_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub conversation_retention_days: i64,
    pub message_retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub debounce_ms: u64,
    pub tick_interval_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/plenna-offline.db".to_string(),
                max_connections: 5,
            },
            chat: ChatCacheConfig::default(),
            sync: SyncConfig::default(),
            response_cache: ResponseCacheConfig {
                default_ttl_secs: 1800, // 30 minutes
            },
            monitor: MonitorConfig {
                debounce_ms: 2000,
                tick_interval_secs: 60,
            },
            extra_collections: vec![],
        }
    }
}

impl Default for ChatCacheConfig {
    fn default() -> Self {
        Self {
            max_conversations: 100,
            max_messages_per_conversation: 500,
            background_sync_interval_secs: 300, // 5 minutes
            cleanup_interval_secs: 3600,        // 1 hour
            conversation_retention_days: 30,
            message_retention_days: 14,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5000,
            max_delay_ms: 60_000,
            max_retries: 5,
        }
    }
}

impl OfflineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PLENNA_DB_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v;
            }
        }
        if let Ok(v) = std::env::var("PLENNA_DB_MAX_CONNECTIONS") {
            if let Some(value) = parse_u32(&v) {
                cfg.database.max_connections = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_MAX_CONVERSATIONS") {
            if let Some(value) = parse_usize(&v) {
                cfg.chat.max_conversations = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_MAX_MESSAGES_PER_CONVERSATION") {
            if let Some(value) = parse_usize(&v) {
                cfg.chat.max_messages_per_conversation = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_BACKGROUND_SYNC_INTERVAL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.chat.background_sync_interval_secs = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_CLEANUP_INTERVAL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.chat.cleanup_interval_secs = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_SYNC_BASE_DELAY_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.base_delay_ms = value;
            }
        }
        if let Ok(v) = std::env::var("PLENNA_SYNC_MAX_DELAY_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.max_delay_ms = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_SYNC_MAX_RETRIES") {
            if let Some(value) = parse_u32(&v) {
                cfg.sync.max_retries = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("PLENNA_RESPONSE_CACHE_TTL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.response_cache.default_ttl_secs = value.max(1);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.chat.max_conversations == 0 {
            return Err("Chat max_conversations must be greater than 0".to_string());
        }
        if self.chat.max_messages_per_conversation == 0 {
            return Err("Chat max_messages_per_conversation must be greater than 0".to_string());
        }
        if self.sync.max_delay_ms < self.sync.base_delay_ms {
            return Err("Sync max_delay_ms must not be smaller than base_delay_ms".to_string());
        }
        if self.sync.max_retries == 0 {
            return Err("Sync max_retries must be greater than 0".to_string());
        }
        if self.response_cache.default_ttl_secs == 0 {
            return Err("Response cache default_ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}
