// Client configuration.
//
// File: `~/.coedit/config.toml`
// Environment overrides: `COEDIT_HUB_URL`, `COEDIT_ACCESS_TOKEN`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::awareness::debounce::{DebounceConfig, DEFAULT_DEBOUNCE_MS};
use crate::color::{ColorPool, DEFAULT_PALETTE};
use crate::compaction::{CompactionPolicy, DEFAULT_COMPACTION_THRESHOLD};
use crate::hub::{ReconnectPolicy, DEFAULT_RECONNECT_DELAYS_MS};
use crate::session::SessionOptions;

pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:5000/collab";

/// Root directory for coedit client state: `~/.coedit/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".coedit"))
}

/// Path to the config file: `~/.coedit/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Hub WebSocket endpoint. Must be `wss`, or `ws` on a loopback host.
    pub hub_url: String,
    /// Name shown to other participants.
    pub display_name: Option<String>,
    /// Stable user id. Generated per run when unset.
    pub user_id: Option<String>,
    /// Bearer token. Never written back to disk.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub reconnect_delays_ms: Vec<u64>,
    /// Give up reconnecting after this many failures (unset = never).
    pub max_reconnect_attempts: Option<u32>,
    pub awareness_debounce_ms: u64,
    pub compaction_threshold: usize,
    /// Presence colors, as hex strings.
    pub palette: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.into(),
            display_name: None,
            user_id: None,
            access_token: None,
            reconnect_delays_ms: DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
            max_reconnect_attempts: None,
            awareness_debounce_ms: DEFAULT_DEBOUNCE_MS,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            palette: DEFAULT_PALETTE.iter().map(|color| color.to_string()).collect(),
        }
    }
}

impl SyncConfig {
    /// Load from `~/.coedit/config.toml` and apply environment overrides.
    /// Falls back to defaults if the file is missing or unreadable.
    pub fn load() -> Self {
        let mut config =
            config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default();
        config.apply_env();
        config
    }

    /// Load from a specific path. No environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.coedit/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_fn(|key| std::env::var(key));
    }

    /// Testable variant that accepts an environment lookup function.
    fn apply_env_fn<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Some(url) = env("COEDIT_HUB_URL").ok().filter(|v| !v.trim().is_empty()) {
            self.hub_url = url;
        }
        if let Some(token) = env("COEDIT_ACCESS_TOKEN").ok().filter(|v| !v.is_empty()) {
            self.access_token = Some(token);
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reconnect: ReconnectPolicy::from_millis(
                &self.reconnect_delays_ms,
                self.max_reconnect_attempts,
            ),
            debounce: DebounceConfig::with_millis(self.awareness_debounce_ms),
            compaction: CompactionPolicy::new(self.compaction_threshold),
        }
    }

    pub fn color_pool(&self) -> ColorPool {
        ColorPool::new(self.palette.clone())
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
