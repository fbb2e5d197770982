use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// What the UI layer sees: connectivity, sync activity, queued-mutation
/// count and the last successful sync time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Default for OfflineStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            is_syncing: false,
            pending_count: 0,
            last_sync_at: None,
        }
    }
}

/// Shared status board. Subscribers are notified on every actual state
/// transition and never on a no-op update.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: watch::Sender<OfflineStatus>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OfflineStatus::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<OfflineStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> OfflineStatus {
        self.tx.borrow().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut OfflineStatus)) {
        self.tx.send_if_modified(|status| {
            let before = status.clone();
            apply(status);
            *status != before
        });
    }

    pub fn set_online(&self, is_online: bool) {
        self.update(|s| s.is_online = is_online);
    }

    pub fn set_syncing(&self, is_syncing: bool) {
        self.update(|s| s.is_syncing = is_syncing);
    }

    pub fn set_pending_count(&self, pending_count: u32) {
        self.update(|s| s.pending_count = pending_count);
    }

    pub fn record_sync_completed(&self, at: DateTime<Utc>) {
        self.update(|s| {
            s.is_syncing = false;
            s.last_sync_at = Some(at);
        });
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
