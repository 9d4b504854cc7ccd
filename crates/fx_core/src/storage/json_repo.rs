use std::{fs, path::PathBuf, sync::Mutex};

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use super::schema::{PersistedState, CURRENT_SCHEMA_VERSION};

pub const STATE_FILE_NAME: &str = "currency-widget-state.json";

/// Key-value store kept in a single JSON document on disk.
pub struct JsonFileStore {
    db_path: PathBuf,
    // serializes read-modify-write cycles from concurrent callers
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            db_path: base_dir.join(STATE_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn migrate_if_needed(&self) -> Result<()> {
        let _guard = self.lock()?;
        let mut state = self.read_state()?;
        if state.schema_version < CURRENT_SCHEMA_VERSION {
            log::info!(
                "migrating {} from schema {} to {}",
                self.db_path.display(),
                state.schema_version,
                CURRENT_SCHEMA_VERSION
            );
            state.schema_version = CURRENT_SCHEMA_VERSION;
            self.write_state(&state)?;
        }
        Ok(())
    }

    pub fn load(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock()?;
        Ok(self.read_state()?.entries.remove(key))
    }

    pub fn save(&self, key: &str, value: &Value) -> Result<()> {
        let _guard = self.lock()?;
        let mut state = self.read_state()?;
        state.entries.insert(key.to_string(), value.clone());
        self.write_state(&state)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mut state = self.read_state()?;
        if state.entries.remove(key).is_some() {
            self.write_state(&state)?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow!("state file lock poisoned"))
    }

    fn read_state(&self) -> Result<PersistedState> {
        self.ensure_store_exists()?;
        let raw = fs::read_to_string(&self.db_path)
            .with_context(|| format!("failed to read {}", self.db_path.display()))?;

        if raw.trim().is_empty() {
            return Ok(PersistedState::default());
        }

        serde_json::from_str(&raw).with_context(|| {
            format!(
                "failed to deserialize widget state from {}",
                self.db_path.display()
            )
        })
    }

    fn write_state(&self, state: &PersistedState) -> Result<()> {
        self.ensure_parent_dir()?;
        let tmp_path = self.db_path.with_extension("tmp");

        let serialized = serde_json::to_string_pretty(state)?;
        fs::write(&tmp_path, serialized)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.db_path).with_context(|| {
            format!(
                "failed to atomically move {} to {}",
                tmp_path.display(),
                self.db_path.display()
            )
        })?;

        Ok(())
    }

    fn ensure_store_exists(&self) -> Result<()> {
        if self.db_path.exists() {
            return Ok(());
        }

        self.write_state(&PersistedState::default())
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }
}
