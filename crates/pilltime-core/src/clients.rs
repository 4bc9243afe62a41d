//! Open application windows and the notifications shown to them.
//!
//! The worker never renders anything itself; it asks the host to focus or
//! open windows and to close the notification that was clicked.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowClient {
    pub id: u64,
    pub url: String,
    pub focused: bool,
    /// Whether this worker controls the window
    pub controlled: bool,
}

/// A notification the user interacted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub tag: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl Notification {
    pub fn new(tag: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            title: title.into(),
            body: None,
        }
    }
}

#[async_trait]
pub trait Clients: Send + Sync {
    /// All open window clients, controlled or not.
    async fn match_all(&self) -> Result<Vec<WindowClient>>;

    async fn focus(&self, id: u64) -> Result<WindowClient>;

    async fn open_window(&self, url: &str) -> Result<WindowClient>;

    /// Take control of every open window without waiting for a reload.
    async fn claim(&self) -> Result<()>;

    async fn close_notification(&self, notification: &Notification) -> Result<()>;
}

#[derive(Default)]
struct Registry {
    windows: Vec<WindowClient>,
    notifications: Vec<Notification>,
}

/// In-process `Clients` implementation.
#[derive(Default)]
pub struct WindowRegistry {
    inner: Mutex<Registry>,
    next_id: AtomicU64,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window opened by the user (not by the worker).
    pub async fn add_window(&self, url: &str) -> WindowClient {
        let window = WindowClient {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            url: url.to_string(),
            focused: false,
            controlled: false,
        };
        self.inner.lock().await.windows.push(window.clone());
        window
    }

    /// Record a notification as shown.
    pub async fn show_notification(&self, notification: Notification) {
        self.inner.lock().await.notifications.push(notification);
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().await.notifications.clone()
    }
}

#[async_trait]
impl Clients for WindowRegistry {
    async fn match_all(&self) -> Result<Vec<WindowClient>> {
        Ok(self.inner.lock().await.windows.clone())
    }

    async fn focus(&self, id: u64) -> Result<WindowClient> {
        let mut inner = self.inner.lock().await;
        if !inner.windows.iter().any(|w| w.id == id) {
            return Err(anyhow!("No window with id {}", id));
        }
        let mut focused = None;
        for window in inner.windows.iter_mut() {
            window.focused = window.id == id;
            if window.focused {
                focused = Some(window.clone());
            }
        }
        let focused = focused.ok_or_else(|| anyhow!("No window with id {}", id))?;
        debug!(id, url = %focused.url, "Focused window");
        Ok(focused)
    }

    async fn open_window(&self, url: &str) -> Result<WindowClient> {
        let mut inner = self.inner.lock().await;
        for window in inner.windows.iter_mut() {
            window.focused = false;
        }
        let window = WindowClient {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            url: url.to_string(),
            focused: true,
            controlled: true,
        };
        inner.windows.push(window.clone());
        debug!(id = window.id, url, "Opened window");
        Ok(window)
    }

    async fn claim(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for window in inner.windows.iter_mut() {
            window.controlled = true;
        }
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> Result<()> {
        self.inner
            .lock()
            .await
            .notifications
            .retain(|n| n.tag != notification.tag);
        Ok(())
    }
}
