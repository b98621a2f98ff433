//! Error types for Expotion
//!
//! This module defines the error type used throughout the plugin host.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations. Plugin-authored hooks return
//! `anyhow::Result`; those errors are wrapped in [`ExpotionError::PluginInit`]
//! with the original error kept as the `source`.

use thiserror::Error;

use crate::plugins::LoadStage;

/// The primary error type for Expotion operations.
#[derive(Error, Debug)]
pub enum ExpotionError {
    /// Configuration-related errors (unreadable config file, bad env override, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A discovery source could not enumerate its plugins.
    #[error("Discovery error in {source_label}: {message}")]
    Discovery {
        source_label: String,
        message: String,
    },

    /// A plugin manifest failed validation.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A plugin failed while being constructed, configured or initialized.
    #[error("Plugin '{plugin}' failed during {stage}: {source}")]
    PluginInit {
        plugin: String,
        stage: LoadStage,
        #[source]
        source: anyhow::Error,
    },

    /// Blueprint or route registration errors.
    #[error("Routing error: {0}")]
    Routing(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExpotionError {
    /// Name of the plugin responsible for this error, if any.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            ExpotionError::PluginInit { plugin, .. } => Some(plugin),
            _ => None,
        }
    }

    /// Load step a plugin error happened in.
    pub fn stage(&self) -> Option<LoadStage> {
        match self {
            ExpotionError::PluginInit { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// A specialized `Result` type for Expotion operations.
pub type Result<T> = std::result::Result<T, ExpotionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = ExpotionError::Config("missing plugins dir".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing plugins dir");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExpotionError = io_err.into();
        assert!(matches!(err, ExpotionError::Io(_)));
    }

    #[test]
    fn test_plugin_init_keeps_source() {
        let err = ExpotionError::PluginInit {
            plugin: "alpha-plugin".to_string(),
            stage: LoadStage::InitApp,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(
            err.to_string(),
            "Plugin 'alpha-plugin' failed during init_app: boom"
        );
        assert_eq!(err.plugin(), Some("alpha-plugin"));
        assert_eq!(err.stage(), Some(LoadStage::InitApp));
        assert_eq!(err.source().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_discovery_display() {
        let err = ExpotionError::Discovery {
            source_label: "local:/srv/plugins".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Discovery error in local:/srv/plugins: permission denied"
        );
        assert!(err.plugin().is_none());
        assert!(err.stage().is_none());
    }
}
