use std::path::PathBuf;

use thiserror::Error;

use crate::cache::WorkerState;

/// Maximum length for upstream response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Network unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache generation not found: {0}")]
    MissingGeneration(String),

    #[error("Invalid cache generation name: {0}")]
    InvalidName(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Cannot handle {event} while {from:?}")]
    InvalidTransition {
        from: WorkerState,
        event: &'static str,
    },

    #[error("Install failed for {path}: {reason}")]
    Install { path: String, reason: String },

    #[error("Cache generation {0} is not installed")]
    NotInstalled(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Duplicate manifest entry: {0}")]
    DuplicateAsset(String),

    #[error("Manifest entry must be an absolute path: {0}")]
    RelativeAsset(String),

    #[error("Cache prefix must not be empty")]
    EmptyPrefix,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Email service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
}

impl WorkerError {
    /// Build an install failure from an upstream status, keeping the body short
    pub fn install_status(path: &str, status: u16, body: &[u8]) -> Self {
        let body = String::from_utf8_lossy(body);
        WorkerError::Install {
            path: path.to_string(),
            reason: format!(
                "status {}: {}",
                status,
                crate::utils::truncate_string(&body, MAX_ERROR_BODY_LENGTH)
            ),
        }
    }
}
