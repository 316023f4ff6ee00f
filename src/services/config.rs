use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::CoreResult;
use crate::model::config::AppConfig;
use crate::services::storage;

pub const CONFIG_FILE: &str = "config.json";

/// `config.json` beside the executable, or in the working directory when the
/// executable location is unknown.
pub fn default_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Missing or unreadable files fall back to defaults; the next save
/// overwrites them.
pub fn load(path: &Path) -> AppConfig {
    if !path.exists() {
        info!(path = %path.display(), "no configuration file, using defaults");
        return AppConfig::default();
    }

    let data = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), "failed to read configuration: {e}");
            return AppConfig::default();
        }
    };

    match serde_json::from_str(&data) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), "failed to parse configuration: {e}");
            AppConfig::default()
        }
    }
}

pub fn save(path: &Path, config: &AppConfig) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(config)?;
    storage::write_atomic(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ProviderKind;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load(&dir.path().join(CONFIG_FILE));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(load(&path), AppConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut cfg = AppConfig::default();
        cfg.selected_provider = ProviderKind::OpenAi;
        cfg.open_ai.api_key = "sk-local".into();
        cfg.batch.concurrency = 8;

        save(&path, &cfg).unwrap();
        assert_eq!(load(&path), cfg);
    }
}
