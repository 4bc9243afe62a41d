use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{Request, Response};

/// A stored request/response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub request: Request,
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// A single named cache store.
///
/// Entries are keyed by [`Request::cache_key`]. Writes to the same key are
/// last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    /// Look up a stored response for this request.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

    /// Store a response under this request.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// All stored requests.
    async fn keys(&self) -> Result<Vec<Request>>;

    /// All stored entries with their timestamps.
    async fn entries(&self) -> Result<Vec<CachedEntry>>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, request: &Request) -> Result<bool>;
}

/// The collection of named cache stores for one origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache store, creating it if it doesn't exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all existing cache stores.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a whole cache store. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Look up a request across every cache store.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        for name in self.keys().await? {
            let store = self.open(&name).await?;
            if let Some(response) = store.match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry() -> CachedEntry {
        CachedEntry::new(
            Request::get("http://localhost/index.html"),
            Response::new(200, "<html></html>"),
        )
    }

    #[test]
    fn test_age_display_just_now() {
        assert_eq!(entry().age_display(), "just now");
    }

    #[test]
    fn test_age_display_minutes_hours_days() {
        let mut e = entry();
        e.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(e.age_display(), "5m ago");

        e.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(e.age_display(), "2h ago");

        e.cached_at = Utc::now() - Duration::hours(26);
        assert_eq!(e.age_display(), "1d ago");
    }

    #[test]
    fn test_age_display_future_timestamp() {
        let mut e = entry();
        e.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(e.age_display(), "just now");
    }
}
