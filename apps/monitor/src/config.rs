//! Monitor configuration.
//!
//! Read from `~/.config/fleetlive/monitor.json` (`%APPDATA%\fleetlive` on
//! Windows). Every field is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fleetlive_connection::LiveConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// SSE endpoint of the dashboard server.
    pub endpoint: String,

    /// Whether push events produce notifications.
    pub notifications_enabled: bool,

    /// Reconnect and decoding tunables.
    pub live: LiveConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/events".into(),
            notifications_enabled: true,
            live: LiveConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Loads the config file, falling back to defaults if it is missing or
    /// unreadable as JSON.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<MonitorConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse monitor config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("fleetlive").join("monitor.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }
}
