//! Daemon settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use led_mux::ManagerConfig;
use serde::{Deserialize, Serialize};

/// Default log filter covering every crate in the workspace
pub const DEFAULT_LOG_FILTER: &str =
    "led_daemon=info,led_protocol=info,led_registry=info,led_mux=info,led_sim=info";

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Registry JSON file; relative paths resolve against the config dir
    pub registry_path: PathBuf,
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Manager timings and queue sizes
    pub manager: ManagerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("registry.json"),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            manager: ManagerConfig::default(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for the daemon
    /// Uses $XDG_CONFIG_HOME/led-daemon, falls back to ~/.config/led-daemon
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("led-daemon"));
            }
        }
        dirs::home_dir().map(|h| h.join(".config").join("led-daemon"))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings {}", path.display()))
            }
        };
        serde_json::from_str(&text).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Write settings to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Resolve the registry path relative to the directory holding the settings
    pub fn resolved_registry_path(&self, settings_path: Option<&Path>) -> PathBuf {
        if self.registry_path.is_absolute() {
            return self.registry_path.clone();
        }
        match settings_path.and_then(Path::parent) {
            Some(dir) => dir.join(&self.registry_path),
            None => self.registry_path.clone(),
        }
    }
}
