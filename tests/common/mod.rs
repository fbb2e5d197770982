#![allow(dead_code)]

use std::sync::Arc;

use plenna_offline::test_support::MockRemoteService;
use plenna_offline::{
    ChannelConnectivity, ConnectivityPublisher, MemoryStorageEngine, OfflineCache, OfflineConfig,
};

pub struct TestHarness {
    pub cache: Arc<OfflineCache>,
    pub remote: Arc<MockRemoteService>,
    pub publisher: ConnectivityPublisher,
}

/// Config with zeroed delays and hour-long timers so the tests, not the
/// clock, drive every transition.
pub fn fast_config() -> OfflineConfig {
    let mut config = OfflineConfig::default();
    config.sync.base_delay_ms = 0;
    config.sync.max_retries = 3;
    config.monitor.debounce_ms = 0;
    config.monitor.tick_interval_secs = 3600;
    config.chat.background_sync_interval_secs = 3600;
    config.chat.cleanup_interval_secs = 3600;
    config
}

pub async fn open_memory_cache() -> TestHarness {
    let config = fast_config();
    let remote = Arc::new(MockRemoteService::new());
    let (publisher, source) = ChannelConnectivity::channel(16);
    let engine = Arc::new(MemoryStorageEngine::new(&OfflineCache::collections(&config)));

    let cache = OfflineCache::open(config, engine, remote.clone(), Arc::new(source))
        .await
        .expect("open offline cache");

    TestHarness {
        cache,
        remote,
        publisher,
    }
}
