//! Host application configuration
//!
//! `AppConfig` is read from a JSON file (default `~/.expotion/config.json`)
//! and then patched from environment variables. A `.env` file in the working
//! directory is honored via `dotenvy`.
//!
//! ```json
//! {
//!   "name": "expotion",
//!   "disabled_plugins": ["legacy-reports"],
//!   "plugins_dir": "/srv/expotion/plugins",
//!   "failure_policy": "isolate",
//!   "plugins": {
//!     "alpha-plugin": { "greeting": "hi" }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ExpotionError, Result};

/// Comma-separated list of plugin names that must not be loaded.
pub const ENV_DISABLED_PLUGINS: &str = "EXPOTION_DISABLED_PLUGINS";
/// Directory scanned for manifest plugins.
pub const ENV_PLUGINS_DIR: &str = "EXPOTION_PLUGINS_DIR";
/// `fail_fast` or `isolate`.
pub const ENV_FAILURE_POLICY: &str = "EXPOTION_FAILURE_POLICY";

/// What the loader does when a plugin fails to construct or initialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort `load_all` and return the first plugin error.
    #[default]
    FailFast,
    /// Log the error, disable the plugin, and keep loading the rest.
    Isolate,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ExpotionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "failfast" => Ok(FailurePolicy::FailFast),
            "isolate" => Ok(FailurePolicy::Isolate),
            other => Err(ExpotionError::Config(format!(
                "Unknown failure policy '{}': expected 'fail_fast' or 'isolate'",
                other
            ))),
        }
    }
}

/// Configuration handed to the host application and read by the plugin loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, shown by the CLI and in the template context.
    pub name: String,

    /// Plugins that are discovered but never initialized.
    pub disabled_plugins: Vec<String>,

    /// Optional directory with `<name>/plugin.json` manifest plugins.
    pub plugins_dir: Option<PathBuf>,

    /// Policy applied when a plugin fails.
    pub failure_policy: FailurePolicy,

    /// Per-plugin configuration, keyed by plugin name. Merged over the
    /// plugin's own defaults before `configure` is called.
    pub plugins: HashMap<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "expotion".to_string(),
            disabled_plugins: Vec::new(),
            plugins_dir: None,
            failure_policy: FailurePolicy::default(),
            plugins: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Default config file location (`~/.expotion/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".expotion")
            .join("config.json")
    }

    /// Load config from `path`, falling back to defaults when the file does
    /// not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a config file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExpotionError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply `EXPOTION_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup(ENV_DISABLED_PLUGINS) {
            self.disabled_plugins = list
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup(ENV_PLUGINS_DIR) {
            if !dir.trim().is_empty() {
                self.plugins_dir = Some(PathBuf::from(dir.trim()));
            }
        }
        if let Some(policy) = lookup(ENV_FAILURE_POLICY) {
            self.failure_policy = policy.parse()?;
        }
        Ok(())
    }

    /// User configuration for a single plugin, if any.
    pub fn plugin_config(&self, name: &str) -> Option<&Value> {
        self.plugins.get(name)
    }
}
