//! File-backed cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<hex(cache name)>/<sha256(request key)>.entry
//! ```
//!
//! An entry file is one line of JSON metadata, a newline, then the raw
//! response body. Metadata and body land in a single rename, so a reader
//! never pairs one writer's headers with another writer's body.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::storage::{CacheStorage, CacheStore, CachedEntry};
use crate::http::{Request, Response};

const ENTRY_EXT: &str = "entry";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write through a temp file and rename so readers never see partial files.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!(
        "tmp.{}.{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move cache file into place: {}", path.display()))?;
    Ok(())
}

pub struct DiskStore {
    name: String,
    dir: PathBuf,
}

impl DiskStore {
    fn entry_stem(request: &Request) -> String {
        hex::encode(Sha256::digest(request.cache_key().as_bytes()))
    }

    fn entry_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stem, ENTRY_EXT))
    }

    fn encode(entry: &CachedEntry) -> Result<Vec<u8>> {
        // Compact JSON never contains a raw newline
        let mut contents = serde_json::to_vec(entry)?;
        contents.push(b'\n');
        contents.extend_from_slice(&entry.response.body);
        Ok(contents)
    }

    fn load(&self, stem: &str) -> Result<Option<CachedEntry>> {
        let path = self.entry_path(stem);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read(&path)
            .with_context(|| format!("Failed to read cache entry: {}", path.display()))?;
        let split = contents
            .iter()
            .position(|&b| b == b'\n')
            .with_context(|| format!("Cache entry has no body separator: {}", path.display()))?;
        let mut entry: CachedEntry = serde_json::from_slice(&contents[..split])
            .with_context(|| format!("Failed to parse cache entry: {}", path.display()))?;
        entry.response.body = contents[split + 1..].to_vec();
        Ok(Some(entry))
    }

    fn stems(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut stems = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let entry = self.load(&Self::entry_stem(request))?;
        // Guards against a hash collision serving the wrong resource
        Ok(entry
            .filter(|e| e.request.cache_key() == request.cache_key())
            .map(|e| e.response))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let stem = Self::entry_stem(request);
        let entry = CachedEntry::new(request.clone(), response);
        write_atomic(&self.entry_path(&stem), &Self::encode(&entry)?)?;
        debug!(cache = %self.name, key = %request.cache_key(), "Stored cache entry");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        Ok(self.entries().await?.into_iter().map(|e| e.request).collect())
    }

    async fn entries(&self) -> Result<Vec<CachedEntry>> {
        let mut entries = Vec::new();
        for stem in self.stems()? {
            match self.load(&stem) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(cache = %self.name, entry = %stem, error = %e, "Skipping unreadable cache entry"),
            }
        }
        entries.sort_by(|a, b| a.request.url.cmp(&b.request.url));
        Ok(entries)
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        let path = self.entry_path(&Self::entry_stem(request));
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete cache entry: {}", path.display()))?;
        Ok(true)
    }
}

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let dir = self.store_dir(name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to open cache store: {}", name))?;
        Ok(Arc::new(DiskStore {
            name: name.to_string(),
            dir,
        }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.store_dir(name).is_dir())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dirent in std::fs::read_dir(&self.root)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_dir() {
                continue;
            }
            let dir_name = dirent.file_name();
            let Some(encoded) = dir_name.to_str() else {
                continue;
            };
            match hex::decode(encoded).ok().and_then(|b| String::from_utf8(b).ok()) {
                Some(name) => names.push(name),
                None => debug!(dir = %encoded, "Ignoring foreign directory in cache root"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete cache store: {}", name))?;
        Ok(true)
    }
}
