use crate::application::ports::{ConnectivitySource, RemoteService, StorageEngine};
use crate::application::services::{
    ChatCacheService, NetworkMonitor, OfflineStatus, ResponseCache, StatusBroadcaster,
    SyncPassReport, SyncQueueService,
};
use crate::domain::collections;
use crate::domain::entities::StorageFootprint;
use crate::infrastructure::storage::SqliteStorageEngine;
use crate::shared::config::OfflineConfig;
use crate::shared::error::{CacheError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Explicit, injected entry point to the offline layer. Everything the
/// host needs comes through here; there are no process-wide singletons,
/// so independent instances (one per test, say) are cheap.
pub struct OfflineCache {
    engine: Arc<dyn StorageEngine>,
    responses: Arc<ResponseCache>,
    chat: Arc<ChatCacheService>,
    queue: Arc<SyncQueueService>,
    monitor: NetworkMonitor,
    status: StatusBroadcaster,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineCache {
    /// The collection set this configuration opens with.
    pub fn collections(config: &OfflineConfig) -> Vec<String> {
        let mut names = collections::base_collections();
        for extra in &config.extra_collections {
            if !names.iter().any(|n| n == extra) {
                names.push(extra.clone());
            }
        }
        names
    }

    /// Opens over the SQLite engine built from `config.database`. Fails
    /// fatally when the engine cannot be brought up; the host decides
    /// whether to retry, run degraded over a `MemoryStorageEngine`, or
    /// refuse to start.
    pub async fn open_sqlite(
        config: OfflineConfig,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> Result<Arc<Self>> {
        let engine = Arc::new(
            SqliteStorageEngine::open(&config.database, &Self::collections(&config)).await?,
        );
        Self::open(config, engine, remote, connectivity).await
    }

    pub async fn open(
        config: OfflineConfig,
        engine: Arc<dyn StorageEngine>,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(CacheError::Configuration)?;

        let status = StatusBroadcaster::new();

        let mut domain_collections = vec![
            collections::CONVERSATIONS.to_string(),
            collections::MESSAGES.to_string(),
        ];
        domain_collections.extend(config.extra_collections.iter().cloned());

        let queue = Arc::new(SyncQueueService::new(
            engine.clone(),
            remote.clone(),
            status.clone(),
            config.sync.clone(),
            domain_collections,
        ));

        let reindex = queue.reindex_on_open().await?;
        info!(
            target: "offline::cache",
            queued = reindex.queued_total,
            requeued = reindex.requeued,
            "offline cache opened"
        );

        let responses = Arc::new(ResponseCache::new(engine.clone(), &config.response_cache));
        let chat = Arc::new(ChatCacheService::new(
            engine.clone(),
            remote,
            queue.clone(),
            status.clone(),
            config.chat.clone(),
        ));
        let monitor = NetworkMonitor::new(queue.clone(), status.clone(), config.monitor.clone());
        monitor.register_participant(chat.clone());

        let cache = Arc::new(Self {
            engine,
            responses,
            chat,
            queue,
            monitor,
            status,
            tasks: Mutex::new(Vec::new()),
        });
        cache.spawn_background_tasks(connectivity, &config);
        Ok(cache)
    }

    fn spawn_background_tasks(
        &self,
        connectivity: Arc<dyn ConnectivitySource>,
        config: &OfflineConfig,
    ) {
        let mut tasks = vec![
            self.monitor.spawn_event_loop(connectivity),
            self.monitor.spawn_ticker(),
        ];

        let sync_interval = Duration::from_secs(config.chat.background_sync_interval_secs);
        let chat = self.chat.clone();
        let monitor = self.monitor.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sync_interval);
            // the immediate first tick doubles as the initial warm-up fetch
            loop {
                interval.tick().await;
                if !monitor.is_online() {
                    continue;
                }
                if let Err(err) = chat.reconcile_conversations().await {
                    warn!(target: "offline::cache", error = %err, "periodic reconcile failed");
                }
            }
        }));

        let cleanup_interval = Duration::from_secs(config.chat.cleanup_interval_secs);
        let chat = self.chat.clone();
        let responses = self.responses.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            interval.tick().await; // nothing to clean right after open
            loop {
                interval.tick().await;
                if let Err(err) = chat.cleanup().await {
                    warn!(target: "offline::cache", error = %err, "cleanup pass failed");
                }
                match responses.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => {
                        info!(target: "offline::cache", purged, "expired response entries purged");
                    }
                    Err(err) => {
                        warn!(target: "offline::cache", error = %err, "response purge failed");
                    }
                }
            }
        }));

        *self.tasks.lock().expect("task registry poisoned") = tasks;
    }

    pub fn chat(&self) -> &Arc<ChatCacheService> {
        &self.chat
    }

    pub fn responses(&self) -> &Arc<ResponseCache> {
        &self.responses
    }

    pub fn queue(&self) -> &Arc<SyncQueueService> {
        &self.queue
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn status(&self) -> OfflineStatus {
        self.status.current()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<OfflineStatus> {
        self.status.subscribe()
    }

    /// Bypasses backoff and drains the queue now; `Offline` when
    /// connectivity is down.
    pub async fn force_sync(&self) -> Result<SyncPassReport> {
        self.queue.force_sync().await
    }

    pub async fn storage_footprint(&self) -> Result<StorageFootprint> {
        self.engine.storage_footprint().await
    }

    /// Stops the background tasks and releases the engine. The instance
    /// keeps serving direct reads until dropped.
    pub async fn close(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("task registry poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        self.engine.close().await;
        info!(target: "offline::cache", "offline cache closed");
    }
}
