//! Named cache generations: the storage seam of the offline worker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::entry::{CachedResponse, Request, Response};
use crate::error::StorageError;

/// Application name used for the default cache directory
const APP_NAME: &str = "linkedcv";

/// Contents of one cache generation, keyed by request path
pub type Generation = BTreeMap<String, CachedResponse>;

/// Cache-API equivalent: a set of named generations, each mapping requests to
/// stored responses.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the generation if it does not exist yet
    async fn open(&self, name: &str) -> Result<(), StorageError>;

    async fn has(&self, name: &str) -> Result<bool, StorageError>;

    /// Names of all generations, in creation order where the backend knows it
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Returns whether a generation was actually removed
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError>;

    async fn put(&self, name: &str, request: &Request, response: Response)
        -> Result<(), StorageError>;

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), StorageError> {
        for (request, response) in entries {
            self.put(name, &request, response).await?;
        }
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Generation, StorageError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    generations: Mutex<Vec<(String, Generation)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_generations<R>(&self, f: impl FnOnce(&mut Vec<(String, Generation)>) -> R) -> R {
        // A poisoned lock only means another task panicked mid-update; the map itself is intact
        let mut guard = self
            .generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        self.with_generations(|gens| {
            if !gens.iter().any(|(n, _)| n == name) {
                gens.push((name.to_string(), Generation::new()));
            }
        });
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.with_generations(|gens| gens.iter().any(|(n, _)| n == name)))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.with_generations(|gens| gens.iter().map(|(n, _)| n.clone()).collect()))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.with_generations(|gens| {
            let before = gens.len();
            gens.retain(|(n, _)| n != name);
            gens.len() != before
        }))
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        Ok(self.with_generations(|gens| {
            gens.iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, entries)| entries.get(request.cache_key()))
                .map(|cached| cached.response.clone())
        }))
    }

    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: Response,
    ) -> Result<(), StorageError> {
        self.with_generations(|gens| {
            let index = match gens.iter().position(|(n, _)| n == name) {
                Some(index) => index,
                None => {
                    gens.push((name.to_string(), Generation::new()));
                    gens.len() - 1
                }
            };
            gens[index]
                .1
                .insert(request.cache_key().to_string(), CachedResponse::new(response));
        });
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Generation, StorageError> {
        self.with_generations(|gens| {
            gens.iter()
                .find(|(n, _)| n == name)
                .map(|(_, entries)| entries.clone())
                .ok_or_else(|| StorageError::MissingGeneration(name.to_string()))
        })
    }
}

// ============================================================================
// File-backed backend
// ============================================================================

/// Subdirectory of the cache directory that holds the generation files
const GENERATIONS_DIR: &str = "generations";

/// Extension of a generation file
const GENERATION_EXT: &str = "json";

/// Generation names double as file stems, so they are restricted to a
/// conservative character set.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Stores each generation as `<cache_dir>/generations/<name>.json`.
///
/// Only files in that subdirectory with a valid name are generations;
/// anything else sharing the cache directory is left alone.
pub struct DiskStorage {
    cache_dir: PathBuf,
    generations_dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl DiskStorage {
    pub fn new(cache_dir: PathBuf) -> Result<Self, StorageError> {
        let generations_dir = cache_dir.join(GENERATIONS_DIR);
        std::fs::create_dir_all(&generations_dir)?;
        Ok(Self {
            cache_dir,
            generations_dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Default location: the platform cache directory, e.g. `~/.cache/linkedcv`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn generation_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self
            .generations_dir
            .join(format!("{}.{}", name, GENERATION_EXT)))
    }

    fn load(&self, name: &str) -> Result<Option<Generation>, StorageError> {
        let path = self.generation_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, name: &str, generation: &Generation) -> Result<(), StorageError> {
        let path = self.generation_path(name)?;
        let contents = serde_json::to_string(generation)?;
        // Readers don't take the write lock, so swap the file in whole
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        if self.load(name)?.is_none() {
            debug!(generation = name, "Creating cache generation");
            self.save(name, &Generation::new())?;
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.generation_path(name)?.exists())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.generations_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(GENERATION_EXT) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if is_valid_name(stem) => names.push(stem.to_string()),
                _ => debug!(path = %path.display(), "Skipping non-generation file"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.generation_path(name)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        Ok(self
            .load(name)?
            .and_then(|mut entries| entries.remove(request.cache_key()))
            .map(|cached| cached.response))
    }

    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: Response,
    ) -> Result<(), StorageError> {
        self.put_all(name, vec![(request.clone(), response)]).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut generation = self.load(name)?.unwrap_or_default();
        for (request, response) in entries {
            generation.insert(request.cache_key().to_string(), CachedResponse::new(response));
        }
        self.save(name, &generation)
    }

    async fn entries(&self, name: &str) -> Result<Generation, StorageError> {
        self.load(name)?
            .ok_or_else(|| StorageError::MissingGeneration(name.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "linkedcv-storage-{}-{}-{}",
            label,
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_memory_keys_keep_creation_order() {
        let storage = MemoryStorage::new();
        storage.open("app-v2").await.unwrap();
        storage.open("app-v1").await.unwrap();
        storage.open("app-v2").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["app-v2", "app-v1"]);
    }

    #[tokio::test]
    async fn test_memory_put_and_match() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        storage
            .put("app-v1", &Request::get("/a"), Response::ok("alpha"))
            .await
            .unwrap();

        let hit = storage.match_request("app-v1", &Request::get("/a")).await.unwrap();
        assert_eq!(hit.map(|r| r.body), Some(b"alpha".to_vec()));

        let other = storage.match_request("app-v2", &Request::get("/a")).await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_memory_delete_reports_removal() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        assert!(storage.delete("app-v1").await.unwrap());
        assert!(!storage.delete("app-v1").await.unwrap());
        assert!(matches!(
            storage.entries("app-v1").await,
            Err(StorageError::MissingGeneration(_))
        ));
    }

    #[tokio::test]
    async fn test_disk_round_trip_between_instances() {
        let dir = temp_cache_dir("roundtrip");
        {
            let storage = DiskStorage::new(dir.clone()).unwrap();
            storage.open("app-v1").await.unwrap();
            storage
                .put(
                    "app-v1",
                    &Request::get("/style.css"),
                    Response::ok("body{}").with_header("content-type", "text/css"),
                )
                .await
                .unwrap();
        }

        let storage = DiskStorage::new(dir.clone()).unwrap();
        assert!(storage.has("app-v1").await.unwrap());
        let hit = storage
            .match_request("app-v1", &Request::get("/style.css"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"body{}".to_vec());
        assert_eq!(hit.header("Content-Type"), Some("text/css"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_disk_keys_and_delete() {
        let dir = temp_cache_dir("keys");
        let storage = DiskStorage::new(dir.clone()).unwrap();
        storage.open("app-v2").await.unwrap();
        storage.open("app-v1").await.unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.join("package.json"), "{}").unwrap();
        std::fs::write(dir.join(GENERATIONS_DIR).join("my notes.json"), "{}").unwrap();
        std::fs::write(dir.join(GENERATIONS_DIR).join(".hidden.json"), "{}").unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["app-v1", "app-v2"]);
        assert!(storage.delete("app-v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["app-v2"]);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_disk_activation_leaves_foreign_files_alone() {
        use std::sync::Arc;

        use crate::cache::manager::{ServiceWorker, WorkerConfig, WorkerState};
        use crate::cache::manifest::AssetManifest;
        use crate::cache::network::fake::FakeNetwork;
        use crate::version::{CacheName, VersionToken};

        let dir = temp_cache_dir("foreign");
        std::fs::write(dir.join("package.json"), r#"{"name":"site"}"#).unwrap();
        let storage = Arc::new(DiskStorage::new(dir.clone()).unwrap());
        std::fs::write(dir.join(GENERATIONS_DIR).join("my notes.json"), "{}").unwrap();
        storage.open("app-vold").await.unwrap();

        let network = Arc::new(FakeNetwork::new().with_route("/", Response::ok("home")));
        let worker = ServiceWorker::new(
            WorkerConfig {
                cache_name: CacheName::new("app", VersionToken::from_revision("abcdef12")).unwrap(),
                manifest: AssetManifest::new(["/"]).unwrap(),
            },
            storage.clone(),
            network,
        );
        worker.install().await.unwrap();
        let report = worker.activate().await.unwrap();

        assert_eq!(report.deleted, vec!["app-vold"]);
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(storage.keys().await.unwrap(), vec!["app-vabcdef12"]);
        assert!(dir.join("package.json").exists());
        assert!(dir.join(GENERATIONS_DIR).join("my notes.json").exists());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_disk_rejects_path_like_names() {
        let dir = temp_cache_dir("names");
        let storage = DiskStorage::new(dir.clone()).unwrap();
        assert!(matches!(
            storage.open("../escape").await,
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(storage.open("").await, Err(StorageError::InvalidName(_))));

        std::fs::remove_dir_all(dir).ok();
    }
}
