//! StorageMedium trait - the string-keyed store the secure adapter writes to.
//!
//! Implementations only promise last-write-wins; there is no transaction or
//! ordering guarantee beyond that.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Async string-keyed get/set/remove store.
#[async_trait]
pub trait StorageMedium: Send + Sync {
    /// Raw stored value, if any
    async fn get_item(&self, name: &str) -> Result<Option<String>>;

    /// Store `value` under `name`, replacing prior content
    async fn set_item(&self, name: &str, value: &str) -> Result<()>;

    /// Delete `name`; deleting a missing key is not an error
    async fn remove_item(&self, name: &str) -> Result<()>;
}

/// In-process medium. Clones share the same entries, so several contexts
/// can be pointed at one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stored names, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageMedium for MemoryMedium {
    async fn get_item(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(name).cloned())
    }

    async fn set_item(&self, name: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<()> {
        self.entries.write().remove(name);
        Ok(())
    }
}

/// A single JSON document (`name -> value`) on disk.
///
/// Every mutation rewrites the file before returning.
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored names, sorted
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.into_keys().collect())
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Medium(format!("cannot parse {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the file atomically: write a 0600 sibling, then rename it
    /// over the target. Readers see either the old or the new document.
    async fn store(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.temp_path();
        if let Err(e) = write_private(&temp_path, content.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Wrote {} entries to {}", entries.len(), self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }
}

/// Create `path` owner-only (Unix) and write `content` durably.
async fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

#[async_trait]
impl StorageMedium for FileMedium {
    async fn get_item(&self, name: &str) -> Result<Option<String>> {
        Ok(self.load().await?.remove(name))
    }

    async fn set_item(&self, name: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(name.to_string(), value.to_string());
        self.store(&entries).await
    }

    async fn remove_item(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(name).is_some() {
            self.store(&entries).await?;
        }
        Ok(())
    }
}
