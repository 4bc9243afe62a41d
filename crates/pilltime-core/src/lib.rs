//! Core library for Pill Time's offline cache.
//!
//! This crate provides:
//! - `ServiceWorker`: install / activate / fetch / notification-click handlers
//! - `WorkerHost`: an event loop that delivers lifecycle events in order
//! - `CacheStorage` backends (in-memory and on-disk)
//! - `HttpNetwork`: the network fallback used on cache misses

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod network;
pub mod worker;

pub use cache::{CacheStorage, CacheStore, CachedEntry, DiskStorage, MemoryStorage};
pub use clients::{Clients, Notification, WindowClient, WindowRegistry};
pub use config::{InstallPolicy, NetworkFailurePolicy, WorkerConfig};
pub use error::{FetchError, WorkerError};
pub use host::WorkerHost;
pub use http::{Method, Request, Response, ResponseType};
pub use network::{HttpNetwork, Network};
pub use worker::{ActivateReport, ClickOutcome, InstallReport, ServiceWorker, WorkerState};
