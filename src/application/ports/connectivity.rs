use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// Connectivity and visibility transitions as reported by the host
/// platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
    Foreground,
    Background,
}

/// Injected source of connectivity/visibility signals, so the core never
/// touches platform globals.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Next transition, or `None` once the source is closed.
    async fn recv(&self) -> Option<ConnectivityEvent>;
}

/// Channel-backed source for hosts (and tests) that push events in.
pub struct ChannelConnectivity {
    rx: Mutex<mpsc::Receiver<ConnectivityEvent>>,
}

#[derive(Clone)]
pub struct ConnectivityPublisher {
    tx: mpsc::Sender<ConnectivityEvent>,
}

impl ChannelConnectivity {
    pub fn channel(capacity: usize) -> (ConnectivityPublisher, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ConnectivityPublisher { tx },
            Self { rx: Mutex::new(rx) },
        )
    }
}

#[async_trait]
impl ConnectivitySource for ChannelConnectivity {
    async fn recv(&self) -> Option<ConnectivityEvent> {
        self.rx.lock().await.recv().await
    }
}

impl ConnectivityPublisher {
    pub async fn send(&self, event: ConnectivityEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub async fn online(&self) -> bool {
        self.send(ConnectivityEvent::Online).await
    }

    pub async fn offline(&self) -> bool {
        self.send(ConnectivityEvent::Offline).await
    }

    pub async fn foreground(&self) -> bool {
        self.send(ConnectivityEvent::Foreground).await
    }

    pub async fn background(&self) -> bool {
        self.send(ConnectivityEvent::Background).await
    }
}
