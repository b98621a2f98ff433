//! Plugin types for Expotion
//!
//! This module defines the plugin contract (the [`Plugin`] trait), the values
//! plugins hand back to the host (menu items, health status), and the
//! descriptors discovery sources produce for the loader.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::Application;

/// The contract every plugin implements.
///
/// Only `name`, `version` and `init_app` are required. The remaining methods
/// have no-op or empty defaults.
///
/// # Example
///
/// ```rust
/// use expotion::app::{Application, Blueprint, Response};
/// use expotion::plugins::Plugin;
///
/// struct Hello;
///
/// impl Plugin for Hello {
///     fn name(&self) -> &str { "hello" }
///     fn version(&self) -> &str { "0.1.0" }
///
///     fn init_app(&mut self, app: &Application) -> anyhow::Result<()> {
///         app.register_blueprint(
///             Blueprint::new("hello")
///                 .url_prefix("/hello")
///                 .get("/", "index", |_| Response::text("hello")),
///         )?;
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Free-form version string.
    fn version(&self) -> &str;

    /// Register the plugin's functionality with the host application.
    fn init_app(&mut self, app: &Application) -> anyhow::Result<()>;

    fn description(&self) -> &str {
        ""
    }

    fn author(&self) -> &str {
        ""
    }

    /// Names of plugins that must be initialized before this one.
    /// Names that are not loaded are ignored.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Default settings; user settings from `AppConfig.plugins` are merged
    /// over these before [`Plugin::configure`] is called.
    fn default_config(&self) -> Value {
        json!({})
    }

    /// Receive the effective configuration. Called right before `init_app`.
    fn configure(&mut self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the instance is accepted by the loader, before `init_app`.
    fn on_load(&mut self) {}

    /// Called when the loader unloads the plugin.
    fn on_unload(&mut self) {}

    /// Navigation entries contributed by the plugin.
    fn menu_items(&self) -> Vec<MenuItem> {
        Vec::new()
    }

    fn healthcheck(&self) -> anyhow::Result<HealthStatus> {
        Ok(HealthStatus::ok(self.name(), self.version()))
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Plugin(name={}, version={})>", self.name(), self.version())
    }
}

/// A navigation entry contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl MenuItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            icon: None,
        }
    }
}

/// Result of a plugin health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `ok`, `error`, or any plugin-defined value.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn ok(plugin: &str, version: &str) -> Self {
        Self {
            status: "ok".to_string(),
            plugin: Some(plugin.to_string()),
            version: Some(version.to_string()),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            plugin: None,
            version: None,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Builds a fresh plugin instance.
pub type PluginFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Plugin>>>;

/// A discovered, not yet instantiated plugin.
pub struct PluginEntry {
    /// Entry name as advertised by the source.
    pub name: String,
    /// Where the entry came from, e.g. `entry:alpha` or `local:alpha`.
    pub source: String,
    factory: PluginFactory,
}

impl PluginEntry {
    pub fn new<F>(name: impl Into<String>, source: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Plugin>> + 'static,
    {
        Self {
            name: name.into(),
            source: source.into(),
            factory: Box::new(factory),
        }
    }

    /// Build a new instance. Every call yields a distinct object.
    pub fn instantiate(&self) -> anyhow::Result<Box<dyn Plugin>> {
        (self.factory)()
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// A plugin instance held by the loader after registration.
pub struct LoadedPlugin {
    pub plugin: Box<dyn Plugin>,
    pub source: String,
    pub enabled: bool,
}

impl LoadedPlugin {
    pub fn new(plugin: Box<dyn Plugin>, source: impl Into<String>) -> Self {
        Self {
            plugin,
            source: source.into(),
            enabled: true,
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn version(&self) -> &str {
        self.plugin.version()
    }

    /// Summary used by the CLI and the template context.
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.plugin.name().to_string(),
            version: self.plugin.version().to_string(),
            description: self.plugin.description().to_string(),
            author: self.plugin.author().to_string(),
            source: self.source.clone(),
            enabled: self.enabled,
        }
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("plugin", &self.plugin)
            .field("source", &self.source)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Serializable plugin summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub source: String,
    pub enabled: bool,
}

/// Merge `overlay` into `base`. Objects merge key by key, anything else
/// replaces the base value.
pub fn merge_config(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_config(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Plugin for Bare {
        fn name(&self) -> &str {
            "bare"
        }
        fn version(&self) -> &str {
            "0.0.1"
        }
        fn init_app(&mut self, _app: &Application) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trait_defaults() {
        let plugin = Bare;
        assert_eq!(plugin.description(), "");
        assert!(plugin.dependencies().is_empty());
        assert_eq!(plugin.default_config(), json!({}));
        assert!(plugin.menu_items().is_empty());

        let health = plugin.healthcheck().unwrap();
        assert!(health.is_ok());
        assert_eq!(health.plugin.as_deref(), Some("bare"));
        assert_eq!(health.version.as_deref(), Some("0.0.1"));
    }

    #[test]
    fn test_debug_format() {
        let plugin: Box<dyn Plugin> = Box::new(Bare);
        assert_eq!(
            format!("{:?}", plugin),
            "<Plugin(name=bare, version=0.0.1)>"
        );
    }

    #[test]
    fn test_entry_instantiates_fresh_objects() {
        let entry = PluginEntry::new("bare", "static:bare", || Ok(Box::new(Bare)));
        let a = entry.instantiate().unwrap();
        let b = entry.instantiate().unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(entry.source, "static:bare");
    }

    #[test]
    fn test_loaded_plugin_info() {
        let loaded = LoadedPlugin::new(Box::new(Bare), "static:bare");
        let info = loaded.info();
        assert_eq!(info.name, "bare");
        assert_eq!(info.source, "static:bare");
        assert!(info.enabled);
    }

    #[test]
    fn test_health_status_serialization_skips_empty() {
        let value = serde_json::to_value(HealthStatus::error("down")).unwrap();
        assert_eq!(value, json!({ "status": "error", "message": "down" }));
    }

    #[test]
    fn test_merge_config() {
        let mut base = json!({ "greeting": "hello", "nested": { "a": 1, "b": 2 } });
        merge_config(&mut base, &json!({ "nested": { "b": 3 }, "extra": true }));
        assert_eq!(
            base,
            json!({ "greeting": "hello", "nested": { "a": 1, "b": 3 }, "extra": true })
        );

        let mut scalar = json!(1);
        merge_config(&mut scalar, &json!({ "x": 1 }));
        assert_eq!(scalar, json!({ "x": 1 }));
    }
}
