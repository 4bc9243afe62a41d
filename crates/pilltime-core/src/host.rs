//! Event loop delivering lifecycle events to a worker.
//!
//! Callers send a `HostEvent` carrying a reply channel and wait on the reply;
//! that wait is what holds the lifecycle back until the handler's work has
//! finished. Install and activate run in order on the loop, while fetches and
//! notification clicks are spawned so concurrent requests don't queue behind
//! each other.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::clients::Notification;
use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::worker::{ActivateReport, ClickOutcome, InstallReport, ServiceWorker};

/// Buffer size for the host event channel.
const CHANNEL_BUFFER_SIZE: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

pub enum HostEvent {
    Install(Reply<InstallReport>),
    Activate(Reply<ActivateReport>),
    Fetch(Request, Reply<Response>),
    NotificationClick(Notification, Reply<ClickOutcome>),
}

/// Handle to a running worker event loop. Clone to share between callers.
#[derive(Clone)]
pub struct WorkerHost {
    tx: mpsc::Sender<HostEvent>,
    worker: Arc<ServiceWorker>,
}

impl WorkerHost {
    /// Spawn the event loop on the current tokio runtime.
    pub fn spawn(worker: ServiceWorker) -> Self {
        let worker = Arc::new(worker);
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        tokio::spawn(Self::run(worker.clone(), rx));
        Self { tx, worker }
    }

    pub fn worker(&self) -> &Arc<ServiceWorker> {
        &self.worker
    }

    async fn run(worker: Arc<ServiceWorker>, mut rx: mpsc::Receiver<HostEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                HostEvent::Install(reply) => {
                    let _ = reply.send(worker.install().await);
                }
                HostEvent::Activate(reply) => {
                    let _ = reply.send(worker.activate().await);
                }
                HostEvent::Fetch(request, reply) => {
                    let worker = worker.clone();
                    tokio::spawn(async move {
                        let _ = reply.send(worker.handle_fetch(&request).await);
                    });
                }
                HostEvent::NotificationClick(notification, reply) => {
                    let worker = worker.clone();
                    tokio::spawn(async move {
                        let _ = reply.send(worker.handle_notification_click(&notification).await);
                    });
                }
            }
        }
        debug!("Worker host event loop finished");
    }

    async fn dispatch<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> HostEvent,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| WorkerError::HostClosed)?;
        rx.await.map_err(|_| WorkerError::HostClosed)?
    }

    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.dispatch(HostEvent::Install).await
    }

    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.dispatch(HostEvent::Activate).await
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, WorkerError> {
        self.dispatch(|reply| HostEvent::Fetch(request, reply)).await
    }

    pub async fn notification_click(
        &self,
        notification: Notification,
    ) -> Result<ClickOutcome, WorkerError> {
        self.dispatch(|reply| HostEvent::NotificationClick(notification, reply))
            .await
    }

    /// Install, then activate straight away since install skips waiting.
    pub async fn start(&self) -> Result<(InstallReport, Option<ActivateReport>), WorkerError> {
        let installed = self.install().await?;
        if !self.worker.skip_waiting() {
            info!("Installed worker is waiting for old clients to close");
            return Ok((installed, None));
        }
        let activated = self.activate().await?;
        Ok((installed, Some(activated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::http::{Method, ResponseType};
    use crate::worker::tests::{config, fixture, SCOPE};
    use crate::worker::WorkerState;

    #[tokio::test]
    async fn test_start_installs_and_activates() {
        let f = fixture(config());
        f.storage.open("pill-time-cache-v0").await.unwrap();
        let storage = f.storage.clone();
        let host = WorkerHost::spawn(f.worker);

        let (installed, activated) = host.start().await.unwrap();
        assert_eq!(installed.cached.len(), 1);
        assert_eq!(
            activated.unwrap().deleted,
            vec!["pill-time-cache-v0".to_string()]
        );
        assert_eq!(host.worker().state().await, WorkerState::Activated);
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["pill-time-cache-v1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_fetches() {
        let f = fixture(config());
        for i in 0..8 {
            f.network
                .serve(&format!("./pills/{}.json", i), Response::new(200, format!("{}", i)));
        }
        let host = WorkerHost::spawn(f.worker);
        host.start().await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let host = host.clone();
                tokio::spawn(async move {
                    host.fetch(Request::get(format!("./pills/{}.json", i))).await
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let resp = handle.await.unwrap().unwrap();
            assert_eq!(resp.text(), i.to_string());
        }

        let cache = host.worker().storage().open("pill-time-cache-v1").await.unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_failed_install_blocks_activation() {
        let mut cfg = config();
        cfg.assets.push("./missing.js".to_string());
        let host = WorkerHost::spawn(fixture(cfg).worker);

        assert!(matches!(host.start().await, Err(WorkerError::Install { .. })));
        assert!(matches!(
            host.activate().await,
            Err(WorkerError::InvalidState { .. })
        ));
        assert_eq!(host.worker().state().await, WorkerState::Redundant);
    }

    #[tokio::test]
    async fn test_offline_fetch_through_host() {
        let f = fixture(config());
        let network = f.network.clone();
        let host = WorkerHost::spawn(f.worker);
        host.start().await.unwrap();
        network.set_offline(true);

        let hit = host.fetch(Request::get("./index.html")).await.unwrap();
        assert_eq!(hit.status, 200);

        let miss = host.fetch(Request::get("./missing.json")).await.unwrap();
        assert_eq!(miss.kind, ResponseType::Error);

        let post = host
            .fetch(Request::new(Method::Post, "./api/doses"))
            .await
            .unwrap();
        assert_eq!(post.kind, ResponseType::Error);
    }

    #[tokio::test]
    async fn test_notification_click_through_host() {
        let f = fixture(config());
        let host = WorkerHost::spawn(f.worker);
        let outcome = host
            .notification_click(Notification::new("dose", "Take your pill"))
            .await
            .unwrap();
        assert!(outcome.opened);
        assert_eq!(outcome.window.url, SCOPE);
    }
}
