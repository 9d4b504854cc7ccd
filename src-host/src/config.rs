use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fx_core::RuntimeConfig;

pub const CONFIG_FILE_NAME: &str = "config.json";

pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_local_dir() {
        return dir.join("currency-widget");
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".currency-widget")
}

/// Reads `config.json` from `data_dir` when present. The data dir itself
/// always wins over any `dataDir` in the file.
pub fn load_runtime_config(data_dir: &Path) -> Result<RuntimeConfig> {
    let path = data_dir.join(CONFIG_FILE_NAME);
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        RuntimeConfig::default()
    };
    config.data_dir = Some(data_dir.to_string_lossy().to_string());
    Ok(config)
}
