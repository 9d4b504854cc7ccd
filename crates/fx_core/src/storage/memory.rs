use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

/// In-process store. Used when no data dir is configured and as the test fake.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save`/`remove` fail, to exercise rollback paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn load(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    pub fn save(&self, key: &str, value: &Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write rejected for key {key}");
        }
        let mut entries = self.entries.lock().map_err(|_| anyhow!("store poisoned"))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("remove rejected for key {key}");
        }
        let mut entries = self.entries.lock().map_err(|_| anyhow!("store poisoned"))?;
        entries.remove(key);
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}
