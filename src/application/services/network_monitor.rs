use crate::application::ports::{ConnectivityEvent, ConnectivitySource};
use crate::application::services::status::{OfflineStatus, StatusBroadcaster};
use crate::application::services::sync_queue::SyncQueueService;
use crate::shared::config::MonitorConfig;
use crate::shared::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A cache manager that wants a reconciliation pass when connectivity or
/// visibility comes back.
#[async_trait]
pub trait SyncParticipant: Send + Sync {
    fn name(&self) -> &str;

    async fn reconcile_all(&self) -> Result<u32>;
}

/// The only component aware of connectivity and foreground/background
/// transitions; translates them into queue drains and reconciliation
/// passes for the registered participants. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    queue: Arc<SyncQueueService>,
    participants: RwLock<Vec<Arc<dyn SyncParticipant>>>,
    status: StatusBroadcaster,
    config: MonitorConfig,
    foreground: AtomicBool,
    resume_generation: AtomicU64,
}

impl NetworkMonitor {
    pub fn new(
        queue: Arc<SyncQueueService>,
        status: StatusBroadcaster,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                queue,
                participants: RwLock::new(Vec::new()),
                status,
                config,
                foreground: AtomicBool::new(true),
                resume_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn register_participant(&self, participant: Arc<dyn SyncParticipant>) {
        self.inner
            .participants
            .write()
            .expect("participant registry poisoned")
            .push(participant);
    }

    /// Subscription channel for UI badges; fires on every state
    /// transition and never on a no-op tick.
    pub fn subscribe(&self) -> watch::Receiver<OfflineStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.status.current().is_online
    }

    pub fn is_foreground(&self) -> bool {
        self.inner.foreground.load(Ordering::SeqCst)
    }

    pub async fn handle_event(&self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::Online => {
                let was_online = self.is_online();
                self.inner.status.set_online(true);
                if !was_online {
                    info!(target: "offline::monitor", "connectivity restored");
                    self.schedule_resume();
                }
            }
            ConnectivityEvent::Offline => {
                self.inner.status.set_online(false);
                debug!(target: "offline::monitor", "connectivity lost");
            }
            ConnectivityEvent::Foreground => {
                let was_foreground = self.inner.foreground.swap(true, Ordering::SeqCst);
                if !was_foreground && self.is_online() {
                    self.schedule_resume();
                }
            }
            ConnectivityEvent::Background => {
                self.inner.foreground.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Debounced: a newer transition supersedes the scheduled pass, so a
    /// flapping link produces one drain, not one per flap.
    fn schedule_resume(&self) {
        let generation = self.inner.resume_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(inner.config.debounce_ms)).await;
            if inner.resume_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if !inner.status.current().is_online {
                return;
            }
            inner.run_resume_pass().await;
        });
    }

    /// One queue drain plus one reconciliation pass per participant.
    pub async fn run_resume_pass(&self) {
        self.inner.run_resume_pass().await;
    }

    /// Consumes the injected connectivity source until it closes.
    pub fn spawn_event_loop(&self, source: Arc<dyn ConnectivitySource>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some(event) = source.recv().await {
                monitor.handle_event(event).await;
            }
            debug!(target: "offline::monitor", "connectivity source closed");
        })
    }

    /// Periodic queue passes, gated to online + foregrounded so a
    /// backgrounded app does no work.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(inner.config.tick_interval_secs));
            loop {
                interval.tick().await;
                let foreground = inner.foreground.load(Ordering::SeqCst);
                if !(inner.status.current().is_online && foreground) {
                    continue;
                }
                if let Err(err) = inner.queue.process_queue().await {
                    warn!(target: "offline::monitor", error = %err, "periodic queue pass failed");
                }
            }
        })
    }
}

impl MonitorInner {
    async fn run_resume_pass(&self) {
        self.status.set_syncing(true);

        match self.queue.process_queue().await {
            Ok(report) => {
                debug!(
                    target: "offline::monitor",
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    requeued = report.requeued,
                    abandoned = report.abandoned,
                    "queue processed after resume"
                );
            }
            Err(err) => {
                warn!(target: "offline::monitor", error = %err, "queue pass failed after resume");
            }
        }

        let participants: Vec<Arc<dyn SyncParticipant>> = self
            .participants
            .read()
            .expect("participant registry poisoned")
            .clone();
        let results = join_all(participants.iter().map(|p| p.reconcile_all())).await;
        for (participant, result) in participants.iter().zip(results) {
            if let Err(err) = result {
                warn!(
                    target: "offline::monitor",
                    participant = participant.name(),
                    error = %err,
                    "reconciliation pass failed"
                );
            }
        }

        self.status.record_sync_completed(Utc::now());
    }
}
