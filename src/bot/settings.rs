use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Per-task persisted configuration. Tasks may carry extra keys (the
/// cavebot stores its targeting strategy here); they round-trip intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `bot_settings.json`: `{ "actions": { "<name>": { "enabled": bool, ... } } }`.
/// Single writer (the task host); others re-read on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotSettings {
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSettings>,
}

impl BotSettings {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "unreadable settings, starting fresh");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.actions
            .get(name)
            .map(|action| action.enabled)
            .unwrap_or(false)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        self.actions.entry(name.to_string()).or_default().enabled = enabled;
    }

    /// String-valued extra key for a task (e.g. the cavebot's
    /// `targeting_strategy`).
    pub fn extra_str(&self, name: &str, key: &str) -> Option<&str> {
        self.actions
            .get(name)?
            .extra
            .get(key)?
            .as_str()
    }
}

pub fn default_settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("bot_settings.json")
}
