//! Durable string-keyed storage for alarm records.
//!
//! The repository only ever talks to a [`KeyStore`]. [`FsKeyStore`] keeps one
//! file per key on disk and [`MemoryKeyStore`] is an ephemeral map for tests
//! and embedding hosts that bring their own persistence.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Async key/value store holding serialized alarms under decimal id keys.
///
/// Calls are independent of each other and of the native scheduler; there
/// is no transaction spanning them.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_all_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Returns `Ok(None)` when nothing is stored under `key`.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a key that does not exist succeeds.
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store. Cheaply cloneable; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    items: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. with data left by a previous install.
    #[must_use]
    pub fn with_items<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            items: Arc::new(RwLock::new(
                items
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            )),
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_all_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.items.read().await.keys().cloned().collect())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

/// Filesystem store: every key is a `{dir}/{key}.json` file.
///
/// Writes go to a dot-prefixed temp file which is then renamed over the
/// target, so a crash never leaves a half written record behind.
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    dir: PathBuf,
}

impl FsKeyStore {
    /// Opens (and creates if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        log::debug!("opened key store at {}", dir.display());
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        // keys become file names
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(|c: char| c == '/' || c == '\\' || c.is_control())
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyStore for FsKeyStore {
    async fn get_all_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // skip temp files
            if stem.starts_with('.') {
                continue;
            }
            keys.push(stem.to_string());
        }
        Ok(keys)
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp_path = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp_path, value.as_bytes()).await?;
        if let Ok(file) = tokio::fs::File::open(&tmp_path).await {
            if let Err(e) = file.sync_all().await {
                log::warn!("could not sync {}: {e}", tmp_path.display());
            }
        }
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryKeyStore::new();
        store.set_item("0", "a").await.unwrap();
        store.set_item("1", "b").await.unwrap();
        assert_eq!(store.get_item("0").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.get_all_keys().await.unwrap(), vec!["0", "1"]);
        store.remove_item("0").await.unwrap();
        store.remove_item("0").await.unwrap();
        assert_eq!(store.get_item("0").await.unwrap(), None);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn fs_store_lists_only_committed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::open(dir.path().join("alarms")).unwrap();
        store.set_item("3", "{}").await.unwrap();
        store.set_item("12", "{}").await.unwrap();
        std::fs::write(store.dir().join(".7.json.tmp"), "partial").unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let mut keys = store.get_all_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["12", "3"]);
    }

    #[tokio::test]
    async fn fs_store_overwrites_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::open(dir.path()).unwrap();
        store.set_item("0", "first").await.unwrap();
        store.set_item("0", "second").await.unwrap();
        assert_eq!(store.get_item("0").await.unwrap().as_deref(), Some("second"));
        store.remove_item("0").await.unwrap();
        assert_eq!(store.get_item("0").await.unwrap(), None);
        // removing twice is fine
        store.remove_item("0").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set_item("../escape", "x").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get_item(".hidden").await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
