//! Plugin loading for Expotion
//!
//! `PluginLoader` holds the host application, asks every configured
//! [`PluginSource`] for entries, instantiates them, and calls `init_app` on
//! each instance with the held application.
//!
//! A pass runs in four steps:
//! 1. discovery (errors abort the pass),
//! 2. instantiation, dropping disabled and duplicate names, then `on_load`,
//! 3. ordering by declared dependencies,
//! 4. `configure` followed by `init_app`.
//!
//! Failures in steps 2 and 4 follow the configured [`FailurePolicy`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::app::Application;
use crate::config::FailurePolicy;
use crate::error::{ExpotionError, Result};

use super::entry_points::{EntryPointSource, PluginSource, ENTRY_POINT_GROUP};
use super::manifest::ManifestDirSource;
use super::registry::{PluginRegistry, Registration};
use super::types::{merge_config, HealthStatus, LoadedPlugin, MenuItem, PluginInfo};

/// Extension slot the loader writes its summary into.
pub const LOADER_EXTENSION: &str = "expotion_loader";

/// Why a discovered plugin was not loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Duplicate,
}

/// Step at which a plugin failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    Instantiate,
    Configure,
    InitApp,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStage::Instantiate => "instantiate",
            LoadStage::Configure => "configure",
            LoadStage::InitApp => "init_app",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPlugin {
    pub name: String,
    pub source: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPlugin {
    pub name: String,
    pub stage: LoadStage,
    pub message: String,
}

/// Summary of one `load_all` pass.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Plugins whose `init_app` succeeded, in initialization order.
    pub initialized: Vec<String>,
    pub skipped: Vec<SkippedPlugin>,
    /// Only populated under [`FailurePolicy::Isolate`].
    pub failed: Vec<FailedPlugin>,
    pub finished_at: DateTime<Utc>,
}

impl LoadReport {
    fn new() -> Self {
        Self {
            initialized: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Discovers plugins and initializes them against one host application.
pub struct PluginLoader {
    app: Arc<Application>,
    sources: Vec<Box<dyn PluginSource>>,
    registry: PluginRegistry,
    disabled: Vec<String>,
    failure_policy: FailurePolicy,
    loaded: bool,
}

impl PluginLoader {
    /// Create a loader for `app` with the default sources: the compiled-in
    /// `expotion.plugins` entry points and, when `plugins_dir` is configured,
    /// the manifest directory.
    pub fn new(app: Arc<Application>) -> Self {
        let mut loader = Self::without_sources(app);
        loader.add_source(EntryPointSource::default());
        if let Some(dir) = loader.app.config().plugins_dir.clone() {
            loader.add_source(ManifestDirSource::new(dir));
        }
        loader
    }

    /// Create a loader with no sources; add them with [`PluginLoader::add_source`].
    pub fn without_sources(app: Arc<Application>) -> Self {
        let config = app.config();
        let disabled = config.disabled_plugins.clone();
        let failure_policy = config.failure_policy;

        app.set_extension(
            LOADER_EXTENSION,
            json!({ "group": ENTRY_POINT_GROUP, "loaded": false, "plugins": [] }),
        );

        Self {
            app,
            sources: Vec::new(),
            registry: PluginRegistry::new(),
            disabled,
            failure_policy,
            loaded: false,
        }
    }

    pub fn with_source(mut self, source: impl PluginSource + 'static) -> Self {
        self.add_source(source);
        self
    }

    pub fn add_source(&mut self, source: impl PluginSource + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Exclude a plugin by name in addition to `AppConfig.disabled_plugins`.
    pub fn disable(&mut self, name: impl Into<String>) {
        self.disabled.push(name.into());
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d == name)
    }

    /// The application handed to every plugin.
    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// `true` after a `load_all` pass completed without aborting.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Discover, instantiate and initialize every plugin.
    ///
    /// Calling this again unloads the current instances first and builds new
    /// ones.
    pub fn load_all(&mut self) -> Result<LoadReport> {
        info!(sources = self.sources.len(), "Loading plugins");

        if !self.registry.is_empty() {
            self.unload_all();
        }
        self.loaded = false;

        let mut report = LoadReport::new();
        let mut registry = PluginRegistry::new();

        if let Err(e) = self.collect(&mut registry, &mut report) {
            return Err(self.abort(registry, &report.initialized, e));
        }

        let order = registry.dependency_order();
        registry.reorder(&order);

        if let Err(e) = self.initialize(&mut registry, &mut report) {
            return Err(self.abort(registry, &report.initialized, e));
        }

        self.registry = registry;
        self.loaded = true;
        report.finished_at = Utc::now();

        self.app.set_extension(
            LOADER_EXTENSION,
            json!({
                "group": ENTRY_POINT_GROUP,
                "loaded": true,
                "plugins": report.initialized,
                "loaded_at": report.finished_at.to_rfc3339(),
            }),
        );

        info!(
            loaded = report.initialized.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        Ok(report)
    }

    /// Steps 1 and 2: discovery and instantiation.
    fn collect(&self, registry: &mut PluginRegistry, report: &mut LoadReport) -> Result<()> {
        for source in &self.sources {
            let label = source.label();
            let entries = source.discover().map_err(|e| match e {
                ExpotionError::Discovery { .. } => e,
                other => ExpotionError::Discovery {
                    source_label: label.clone(),
                    message: other.to_string(),
                },
            })?;

            for entry in entries {
                let plugin = match entry.instantiate() {
                    Ok(plugin) if plugin.name().trim().is_empty() => {
                        let e = anyhow::anyhow!("plugin name must not be empty");
                        self.record_failure(&entry.name, LoadStage::Instantiate, e, report)?;
                        continue;
                    }
                    Ok(plugin) => plugin,
                    Err(e) => {
                        self.record_failure(&entry.name, LoadStage::Instantiate, e, report)?;
                        continue;
                    }
                };

                let name = plugin.name().to_string();
                if self.is_disabled(&name) {
                    info!(plugin = %name, "Plugin disabled, skipping");
                    report.skipped.push(SkippedPlugin {
                        name,
                        source: entry.source,
                        reason: SkipReason::Disabled,
                    });
                    continue;
                }

                let version = plugin.version().to_string();
                if let Registration::Duplicate(dup) =
                    registry.register(LoadedPlugin::new(plugin, entry.source.clone()))
                {
                    warn!(plugin = %name, source = %dup.source, "Plugin already loaded, skipping");
                    report.skipped.push(SkippedPlugin {
                        name,
                        source: dup.source,
                        reason: SkipReason::Duplicate,
                    });
                    continue;
                }

                if let Some(loaded) = registry.get_mut(&name) {
                    loaded.plugin.on_load();
                }
                info!(plugin = %name, version = %version, source = %entry.source, "Loaded plugin");
            }
        }
        Ok(())
    }

    /// Step 4: configure and initialize in registry order.
    fn initialize(&self, registry: &mut PluginRegistry, report: &mut LoadReport) -> Result<()> {
        let names: Vec<String> = registry.names().into_iter().map(String::from).collect();

        for name in names {
            let Some(loaded) = registry.get_mut(&name) else {
                continue;
            };

            let mut config = loaded.plugin.default_config();
            if let Some(user) = self.app.config().plugin_config(&name) {
                merge_config(&mut config, user);
            }

            if let Err(e) = loaded.plugin.configure(&config) {
                loaded.enabled = false;
                self.record_failure(&name, LoadStage::Configure, e, report)?;
                continue;
            }

            if let Err(e) = loaded.plugin.init_app(&self.app) {
                loaded.enabled = false;
                self.record_failure(&name, LoadStage::InitApp, e, report)?;
                continue;
            }

            info!(plugin = %name, "Initialized plugin");
            report.initialized.push(name);
        }
        Ok(())
    }

    /// Apply the failure policy. Returns `Err` under fail-fast.
    fn record_failure(
        &self,
        name: &str,
        stage: LoadStage,
        e: anyhow::Error,
        report: &mut LoadReport,
    ) -> Result<()> {
        let message = format!("{:#}", e);
        error!(plugin = %name, stage = ?stage, error = %message, "Plugin failed");

        match self.failure_policy {
            FailurePolicy::FailFast => Err(ExpotionError::PluginInit {
                plugin: name.to_string(),
                stage,
                source: e,
            }),
            FailurePolicy::Isolate => {
                report.failed.push(FailedPlugin {
                    name: name.to_string(),
                    stage,
                    message,
                });
                Ok(())
            }
        }
    }

    /// Keep what was built for introspection, with anything not yet
    /// initialized marked disabled, and record the failed pass on the app.
    fn abort(
        &mut self,
        mut registry: PluginRegistry,
        initialized: &[String],
        e: ExpotionError,
    ) -> ExpotionError {
        let pending: Vec<String> = registry
            .names()
            .into_iter()
            .filter(|name| !initialized.iter().any(|i| i == name))
            .map(String::from)
            .collect();
        for name in pending {
            if let Some(loaded) = registry.get_mut(&name) {
                loaded.enabled = false;
            }
        }
        self.registry = registry;

        self.app.set_extension(
            LOADER_EXTENSION,
            json!({
                "group": ENTRY_POINT_GROUP,
                "loaded": false,
                "plugins": initialized,
                "error": e.to_string(),
            }),
        );
        e
    }

    /// All held plugins by name, enabled or not.
    pub fn plugins(&self) -> HashMap<&str, &LoadedPlugin> {
        self.registry.iter().map(|p| (p.name(), p)).collect()
    }

    pub fn get_plugin(&self, name: &str) -> Option<&LoadedPlugin> {
        self.registry.get(name)
    }

    pub fn get_plugin_mut(&mut self, name: &str) -> Option<&mut LoadedPlugin> {
        self.registry.get_mut(name)
    }

    /// Enabled plugins in initialization order.
    pub fn get_all_plugins(&self) -> Vec<&LoadedPlugin> {
        self.registry.iter().filter(|p| p.enabled).collect()
    }

    /// Menu items of every enabled plugin.
    pub fn get_all_menu_items(&self) -> Vec<MenuItem> {
        self.get_all_plugins()
            .into_iter()
            .flat_map(|p| p.plugin.menu_items())
            .collect()
    }

    /// Health of every held plugin. A failing check is reported, not propagated.
    pub fn healthcheck(&self) -> BTreeMap<String, HealthStatus> {
        self.registry
            .iter()
            .map(|p| {
                let status = match p.plugin.healthcheck() {
                    Ok(status) => status,
                    Err(e) => HealthStatus::error(format!("{:#}", e)),
                };
                (p.name().to_string(), status)
            })
            .collect()
    }

    /// Remove a plugin, calling its `on_unload` hook. Returns `false` if no
    /// plugin with that name is held.
    pub fn unload_plugin(&mut self, name: &str) -> bool {
        match self.registry.remove(name) {
            Some(mut loaded) => {
                loaded.plugin.on_unload();
                info!(plugin = %name, "Plugin unloaded");
                true
            }
            None => false,
        }
    }

    /// Unload every held plugin.
    pub fn unload_all(&mut self) {
        for mut loaded in self.registry.drain() {
            loaded.plugin.on_unload();
            info!(plugin = %loaded.name(), "Plugin unloaded");
        }
        self.loaded = false;
    }

    /// Values a template layer exposes to every page.
    pub fn template_context(&self) -> Value {
        let plugins: Vec<PluginInfo> = self.get_all_plugins().iter().map(|p| p.info()).collect();
        json!({
            "expotion_plugins": plugins,
            "expotion_menu_items": self.get_all_menu_items(),
        })
    }
}
