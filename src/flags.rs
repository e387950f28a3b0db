use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::persistence::FlagStore;

/// Flag store backed by a single pretty-printed JSON object on disk.
///
/// Every `set` rewrites the file. Flags are small and written at most a
/// handful of times per day.
pub struct JsonFlagStore {
    path: PathBuf,
    data: RwLock<HashMap<String, String>>,
}

impl JsonFlagStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read flags from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, data: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write flags to {}", self.path.display()))
    }
}

#[async_trait]
impl FlagStore for JsonFlagStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), value.to_string());
        self.persist(&guard)
    }
}

/// In-process flag store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryFlagStore {
    data: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");

        let store = JsonFlagStore::new(path.clone()).unwrap();
        assert_eq!(store.get("goalReached_2026-01-27").await.unwrap(), None);
        store.set("goalReached_2026-01-27", "true").await.unwrap();

        let reopened = JsonFlagStore::new(path).unwrap();
        assert_eq!(
            reopened.get("goalReached_2026-01-27").await.unwrap().as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonFlagStore::new(path).unwrap();
        assert_eq!(store.get("anything").await.unwrap(), None);
        store.set("anything", "1").await.unwrap();
        assert_eq!(store.get("anything").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryFlagStore::default();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
