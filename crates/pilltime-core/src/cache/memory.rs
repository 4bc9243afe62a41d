//! In-memory cache storage, used in tests and when no cache directory is set.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::storage::{CacheStorage, CacheStore, CachedEntry};
use crate::http::{Request, Response};

pub struct MemoryStore {
    name: String,
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl MemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&request.cache_key())
            .map(|entry| entry.response.clone()))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        let entry = CachedEntry::new(request.clone(), response);
        self.entries.write().await.insert(request.cache_key(), entry);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|e| e.request.clone()).collect())
    }

    async fn entries(&self) -> Result<Vec<CachedEntry>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&request.cache_key())
            .is_some())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    stores: RwLock<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let mut stores = self.stores.write().await;
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name)))
            .clone();
        Ok(store)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.stores.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.stores.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.stores.write().await.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn test_open_creates_and_reuses_store() {
        let storage = MemoryStorage::new();
        assert!(!storage.has("v1").await.unwrap());

        let store = storage.open("v1").await.unwrap();
        let req = Request::get("http://localhost/index.html");
        store.put(&req, Response::new(200, "hello")).await.unwrap();

        let again = storage.open("v1").await.unwrap();
        let hit = again.match_request(&req).await.unwrap().unwrap();
        assert_eq!(hit.text(), "hello");
        assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_match_respects_method() {
        let storage = MemoryStorage::new();
        let store = storage.open("v1").await.unwrap();
        store
            .put(&Request::get("http://localhost/a"), Response::new(200, "a"))
            .await
            .unwrap();

        let post = Request::new(Method::Post, "http://localhost/a");
        assert!(store.match_request(&post).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_same_key_last_write_wins() {
        let storage = MemoryStorage::new();
        let store = storage.open("v1").await.unwrap();
        let req = Request::get("http://localhost/a");
        store.put(&req, Response::new(200, "first")).await.unwrap();
        store.put(&req, Response::new(200, "second")).await.unwrap();

        assert_eq!(store.keys().await.unwrap().len(), 1);
        let hit = store.match_request(&req).await.unwrap().unwrap();
        assert_eq!(hit.text(), "second");
    }

    #[tokio::test]
    async fn test_delete_store_and_entry() {
        let storage = MemoryStorage::new();
        let store = storage.open("old").await.unwrap();
        let req = Request::get("http://localhost/a");
        store.put(&req, Response::new(200, "a")).await.unwrap();

        assert!(store.delete(&req).await.unwrap());
        assert!(!store.delete(&req).await.unwrap());

        assert!(storage.delete("old").await.unwrap());
        assert!(!storage.delete("old").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_wide_match() {
        let storage = MemoryStorage::new();
        storage.open("a").await.unwrap();
        let b = storage.open("b").await.unwrap();
        let req = Request::get("http://localhost/x");
        b.put(&req, Response::new(200, "x")).await.unwrap();

        let hit = storage.match_request(&req).await.unwrap();
        assert_eq!(hit.map(|r| r.text()), Some("x".to_string()));
    }
}
