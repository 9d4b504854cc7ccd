use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::models::{default_favorites, CurrencyCode, HistoryEntry};

pub mod json_repo;
pub mod memory;
pub mod schema;

pub use json_repo::JsonFileStore;
pub use memory::MemoryStore;
use schema::{StoredHistoryEntry, KEY_FAVORITES, KEY_HISTORY};

/// Origin-scoped key-value persistence. The only writer of persisted state.
pub trait PreferencesStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

impl PreferencesStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        self.load(key)
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.save(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove(key)
    }
}

impl PreferencesStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        self.load(key)
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.save(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove(key)
    }
}

#[derive(Clone)]
pub struct StorageService {
    repo: Arc<dyn PreferencesStore>,
}

impl StorageService {
    pub fn new(repo: Arc<dyn PreferencesStore>) -> Self {
        Self { repo }
    }

    /// File-backed storage under `base_dir`, migrated to the current schema.
    pub fn open(base_dir: PathBuf) -> Result<Self> {
        let repo = JsonFileStore::new(base_dir);
        repo.migrate_if_needed()?;
        Ok(Self::new(Arc::new(repo)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Persisted favorites, or the stock list when nothing was saved yet.
    pub fn load_favorites(&self) -> Result<Vec<CurrencyCode>> {
        Ok(self
            .load_typed::<Vec<CurrencyCode>>(KEY_FAVORITES)?
            .unwrap_or_else(default_favorites))
    }

    pub fn save_favorites(&self, favorites: &[CurrencyCode]) -> Result<()> {
        self.save_typed(KEY_FAVORITES, favorites)
    }

    pub fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .load_typed::<Vec<StoredHistoryEntry>>(KEY_HISTORY)?
            .unwrap_or_default()
            .into_iter()
            .map(HistoryEntry::from)
            .collect())
    }

    pub fn save_history(&self, entries: &[HistoryEntry]) -> Result<()> {
        let stored = entries
            .iter()
            .map(StoredHistoryEntry::from)
            .collect::<Vec<_>>();
        self.save_typed(KEY_HISTORY, &stored)
    }

    pub fn clear_history(&self) -> Result<()> {
        self.repo.remove(KEY_HISTORY)
    }

    fn load_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.repo.load(key)? else {
            return Ok(None);
        };
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(error) => {
                log::warn!("ignoring unreadable persisted value for '{key}': {error}");
                Ok(None)
            }
        }
    }

    fn save_typed<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("failed to serialize '{key}'"))?;
        self.repo.save(key, &value)
    }
}
