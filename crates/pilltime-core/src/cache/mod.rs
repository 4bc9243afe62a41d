//! Named, versioned request/response cache stores.
//!
//! This module provides the `CacheStorage` and `CacheStore` traits the worker
//! talks to, plus two backends:
//! - `MemoryStorage`: process-local, used in tests
//! - `DiskStorage`: one directory per cache store, survives restarts

pub mod disk;
pub mod memory;
pub mod storage;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use storage::{CacheStorage, CacheStore, CachedEntry};
