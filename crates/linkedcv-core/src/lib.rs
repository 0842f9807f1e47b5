//! LinkedCV core - build-time versioning and the offline cache worker for the
//! LinkedCV portfolio site, plus the contact relay and translation lookups it
//! ships with.

pub mod cache;
pub mod config;
pub mod contact;
pub mod error;
pub mod i18n;
pub mod utils;
pub mod version;

pub use config::Config;
pub use error::{ConfigError, InjectError, NetworkError, StorageError, TransportError, WorkerError};
