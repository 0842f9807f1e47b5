//! Offline cache worker.
//!
//! This module models the site's Service Worker as an explicit state machine
//! (`ServiceWorker`) that a host drives with install, activate and fetch
//! events. The worker owns exactly one cache generation, named after the
//! deployment's version token:
//!
//! - install precaches the asset manifest, all or nothing
//! - activate deletes every other generation and claims the clients
//! - fetch serves GET requests cache-first and writes misses back
//!
//! Storage and network access sit behind the `CacheStorage` and `Network`
//! traits so the lifecycle can be driven without a browser.

pub mod entry;
pub mod manager;
pub mod manifest;
pub mod network;
pub mod storage;

pub use entry::{CachedResponse, Request, Response};
pub use manager::{
    ActivateReport, FetchOutcome, InstallReport, ResponseSource, ServiceWorker, WorkerConfig,
    WorkerState,
};
pub use manifest::AssetManifest;
pub use network::{HttpNetwork, Network};
pub use storage::{CacheStorage, DiskStorage, Generation, MemoryStorage};
pub use reqwest::Method;
