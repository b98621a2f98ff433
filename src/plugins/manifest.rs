//! Manifest plugins loaded from a directory
//!
//! Each subdirectory of the plugins directory that holds a `plugin.json` file
//! becomes a data-driven plugin. The manifest declares the plugin's identity,
//! the routes of its blueprint and its menu entries; no Rust code is needed.
//!
//! ```text
//! plugins/
//! ├── docs/
//! │   └── plugin.json
//! ├── _disabled/          (ignored: leading underscore)
//! └── .cache/             (ignored: leading dot)
//! ```
//!
//! ```json
//! {
//!   "name": "docs",
//!   "version": "1.0.0",
//!   "description": "Static documentation pages",
//!   "url_prefix": "/docs",
//!   "routes": [
//!     { "rule": "/", "endpoint": "index", "body": "Welcome" },
//!     { "rule": "/status", "content_type": "application/json", "body": "{\"ok\":true}" }
//!   ],
//!   "menu": [ { "title": "Docs", "url": "/docs/" } ]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use http::{Method, StatusCode};

use crate::app::{serde_http, Application, Blueprint, Response};
use crate::error::{ExpotionError, Result};

use super::entry_points::PluginSource;
use super::types::{MenuItem, Plugin, PluginEntry};

/// File name looked up in every plugin directory.
pub const MANIFEST_FILE: &str = "plugin.json";

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_\-]{0,63}$").expect("valid regex"));

/// Contents of a `plugin.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name: 1-64 characters, alphanumeric, `-` or `_`, starting with
    /// an alphanumeric character.
    pub name: String,

    /// Free-form version string, must be non-empty.
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: Option<String>,

    /// Plugins that must be initialized first.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Blueprint prefix. Defaults to `/<name>`.
    #[serde(default)]
    pub url_prefix: Option<String>,

    pub routes: Vec<RouteDef>,

    #[serde(default)]
    pub menu: Vec<MenuItem>,

    /// Default plugin configuration.
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl PluginManifest {
    pub fn effective_prefix(&self) -> String {
        self.url_prefix
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }
}

/// A static route declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDef {
    /// Rule relative to the blueprint prefix; must start with `/`.
    pub rule: String,

    #[serde(default = "default_methods", with = "serde_http::methods")]
    pub methods: Vec<Method>,

    /// Endpoint name. Derived from the rule when absent.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Numeric status code; values outside 100-999 fail to parse.
    #[serde(default = "default_status", with = "serde_http::status")]
    pub status: StatusCode,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default)]
    pub body: String,
}

fn default_methods() -> Vec<Method> {
    vec![Method::GET]
}

fn default_status() -> StatusCode {
    StatusCode::OK
}

fn default_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

impl RouteDef {
    pub fn effective_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        let derived: String = self
            .rule
            .trim_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if derived.is_empty() {
            "index".to_string()
        } else {
            derived
        }
    }
}

/// Validate a manifest.
///
/// Checks:
/// - name format (see [`PluginManifest::name`])
/// - version is non-empty
/// - at least one route, each rule starting with `/` and with at least one method
/// - the prefix, if given, starts with `/`
/// - `config` is a JSON object
pub fn validate_manifest(manifest: &PluginManifest) -> Result<()> {
    if !NAME_RE.is_match(&manifest.name) {
        return Err(ExpotionError::InvalidManifest(format!(
            "Invalid plugin name '{}': must be 1-64 alphanumeric characters, hyphens or underscores, starting with alphanumeric",
            manifest.name
        )));
    }

    if manifest.version.trim().is_empty() {
        return Err(ExpotionError::InvalidManifest(format!(
            "Plugin '{}' has an empty version string",
            manifest.name
        )));
    }

    if let Some(prefix) = &manifest.url_prefix {
        if !prefix.starts_with('/') {
            return Err(ExpotionError::InvalidManifest(format!(
                "Plugin '{}' url_prefix '{}' must start with '/'",
                manifest.name, prefix
            )));
        }
    }

    if manifest.routes.is_empty() {
        return Err(ExpotionError::InvalidManifest(format!(
            "Plugin '{}' must define at least one route",
            manifest.name
        )));
    }

    for route in &manifest.routes {
        if !route.rule.starts_with('/') {
            return Err(ExpotionError::InvalidManifest(format!(
                "Route '{}' in plugin '{}' must start with '/'",
                route.rule, manifest.name
            )));
        }
        if route.methods.is_empty() {
            return Err(ExpotionError::InvalidManifest(format!(
                "Route '{}' in plugin '{}' declares no methods",
                route.rule, manifest.name
            )));
        }
    }

    if !manifest.config.is_object() {
        return Err(ExpotionError::InvalidManifest(format!(
            "Plugin '{}' config must be a JSON object",
            manifest.name
        )));
    }

    Ok(())
}

/// Read and validate `<dir>/plugin.json`.
pub fn load_manifest(dir: &Path) -> Result<PluginManifest> {
    let manifest_path = dir.join(MANIFEST_FILE);

    if !manifest_path.exists() {
        return Err(ExpotionError::InvalidManifest(format!(
            "No {} found in {}",
            MANIFEST_FILE,
            dir.display()
        )));
    }

    let content = fs::read_to_string(&manifest_path).map_err(|e| {
        ExpotionError::InvalidManifest(format!("Failed to read {}: {}", manifest_path.display(), e))
    })?;

    let manifest: PluginManifest = serde_json::from_str(&content)?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// A plugin whose behavior is fully described by its manifest.
#[derive(Debug, Clone)]
pub struct ManifestPlugin {
    manifest: PluginManifest,
    path: PathBuf,
    config: Value,
}

impl ManifestPlugin {
    pub fn new(manifest: PluginManifest, path: PathBuf) -> Self {
        let config = manifest.config.clone();
        Self {
            manifest,
            path,
            config,
        }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Directory the manifest was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective configuration after `configure`.
    pub fn config(&self) -> &Value {
        &self.config
    }

    fn blueprint(&self) -> Blueprint {
        let mut blueprint =
            Blueprint::new(self.manifest.name.clone()).url_prefix(self.manifest.effective_prefix());
        for route in &self.manifest.routes {
            let response = Response::new(route.status, route.content_type.clone(), route.body.clone());
            blueprint = blueprint.route(
                &route.methods,
                route.rule.clone(),
                route.effective_endpoint(),
                move |_| response.clone(),
            );
        }
        blueprint
    }
}

impl Plugin for ManifestPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn author(&self) -> &str {
        self.manifest.author.as_deref().unwrap_or("")
    }

    fn dependencies(&self) -> Vec<String> {
        self.manifest.dependencies.clone()
    }

    fn default_config(&self) -> Value {
        self.manifest.config.clone()
    }

    fn configure(&mut self, config: &Value) -> anyhow::Result<()> {
        self.config = config.clone();
        Ok(())
    }

    fn init_app(&mut self, app: &Application) -> anyhow::Result<()> {
        app.register_blueprint(self.blueprint())?;
        Ok(())
    }

    fn menu_items(&self) -> Vec<MenuItem> {
        self.manifest.menu.clone()
    }
}

/// Source scanning a directory for manifest plugins.
///
/// Directories starting with `_` or `.` are skipped, as are directories
/// without a manifest. Broken manifests are logged and skipped; only a
/// directory that exists but cannot be listed is an error.
#[derive(Debug, Clone)]
pub struct ManifestDirSource {
    dir: PathBuf,
}

impl ManifestDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every valid manifest plugin in the directory, sorted by directory name.
    pub fn scan(&self) -> Result<Vec<ManifestPlugin>> {
        let dir = &self.dir;
        if !dir.exists() {
            info!(dir = %dir.display(), "Plugin directory does not exist, skipping");
            return Ok(Vec::new());
        }

        if !dir.is_dir() {
            warn!(path = %dir.display(), "Plugin path is not a directory, skipping");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(dir).map_err(|e| ExpotionError::Discovery {
            source_label: self.label(),
            message: format!("Failed to read plugin directory {}: {}", dir.display(), e),
        })?;

        let candidates = plugin_dirs(dir, entries.map(|entry| entry.map(|e| e.path())));

        let mut plugins = Vec::new();
        for path in candidates {
            match load_manifest(&path) {
                Ok(manifest) => {
                    info!(
                        plugin = %manifest.name,
                        version = %manifest.version,
                        routes = manifest.routes.len(),
                        "Discovered manifest plugin"
                    );
                    plugins.push(ManifestPlugin::new(manifest, path));
                }
                Err(e) => {
                    warn!(
                        dir = %path.display(),
                        error = %e,
                        "Failed to load plugin manifest, skipping"
                    );
                }
            }
        }

        Ok(plugins)
    }
}

/// Directories among `entries` that hold a manifest and are not hidden or
/// `_`-prefixed, sorted. Entries that cannot be read are logged and skipped.
fn plugin_dirs<I>(dir: &Path, entries: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = std::io::Result<PathBuf>>,
{
    let mut candidates: Vec<PathBuf> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Unreadable plugin directory entry, skipping"
                );
                None
            }
        })
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('_') && !n.starts_with('.'))
                .unwrap_or(false)
        })
        .filter(|path| path.join(MANIFEST_FILE).exists())
        .collect();
    candidates.sort();
    candidates
}

impl PluginSource for ManifestDirSource {
    fn label(&self) -> String {
        format!("local:{}", self.dir.display())
    }

    fn discover(&self) -> Result<Vec<PluginEntry>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|plugin| {
                let dir_name = plugin
                    .path()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let name = plugin.name().to_string();
                PluginEntry::new(name, format!("local:{}", dir_name), move || {
                    Ok(Box::new(plugin.clone()) as Box<dyn Plugin>)
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Request;
    use crate::config::AppConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn valid_manifest() -> PluginManifest {
        serde_json::from_value(json!({
            "name": "docs",
            "version": "1.0.0",
            "description": "Docs pages",
            "routes": [ { "rule": "/", "body": "Welcome" } ]
        }))
        .unwrap()
    }

    fn write_manifest(dir: &Path, manifest: &PluginManifest) {
        fs::create_dir_all(dir).unwrap();
        let content = serde_json::to_string_pretty(manifest).unwrap();
        fs::write(dir.join(MANIFEST_FILE), content).unwrap();
    }

    // ---- manifest parsing / validation ----

    #[test]
    fn test_manifest_defaults() {
        let manifest = valid_manifest();
        assert_eq!(manifest.effective_prefix(), "/docs");
        assert_eq!(manifest.routes[0].methods, vec![Method::GET]);
        assert_eq!(manifest.routes[0].status, StatusCode::OK);
        assert_eq!(manifest.routes[0].effective_endpoint(), "index");
        assert_eq!(manifest.config, json!({}));
        assert!(manifest.menu.is_empty());
    }

    #[test]
    fn test_endpoint_derived_from_rule() {
        let route: RouteDef =
            serde_json::from_value(json!({ "rule": "/api/status", "body": "" })).unwrap();
        assert_eq!(route.effective_endpoint(), "api_status");
    }

    #[test]
    fn test_route_methods_and_status_parse() {
        let route: RouteDef = serde_json::from_value(json!({
            "rule": "/export",
            "methods": ["post", "PUT"],
            "status": 202
        }))
        .unwrap();
        assert_eq!(route.methods, vec![Method::POST, Method::PUT]);
        assert_eq!(route.status, StatusCode::ACCEPTED);

        let bad_status = serde_json::from_value::<RouteDef>(json!({ "rule": "/", "status": 42 }));
        assert!(bad_status.is_err());
        let bad_method =
            serde_json::from_value::<RouteDef>(json!({ "rule": "/", "methods": ["NOT A METHOD"] }));
        assert!(bad_method.is_err());

        let round = serde_json::to_value(&route).unwrap();
        assert_eq!(round["methods"], json!(["POST", "PUT"]));
        assert_eq!(round["status"], json!(202));
    }

    #[test]
    fn test_validate_manifest_valid() {
        assert!(validate_manifest(&valid_manifest()).is_ok());
    }

    #[test]
    fn test_validate_manifest_bad_names() {
        for bad in ["", "bad name", "-start", "bad@name"] {
            let mut manifest = valid_manifest();
            manifest.name = bad.to_string();
            let err = validate_manifest(&manifest).unwrap_err();
            assert!(err.to_string().contains("Invalid plugin name"), "{}", bad);
        }

        let mut manifest = valid_manifest();
        manifest.name = "a".repeat(65);
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn test_validate_manifest_empty_version() {
        let mut manifest = valid_manifest();
        manifest.version = "  ".to_string();
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("empty version"));
    }

    #[test]
    fn test_validate_manifest_routes() {
        let mut manifest = valid_manifest();
        manifest.routes.clear();
        assert!(validate_manifest(&manifest)
            .unwrap_err()
            .to_string()
            .contains("at least one route"));

        let mut manifest = valid_manifest();
        manifest.routes[0].rule = "relative".to_string();
        assert!(validate_manifest(&manifest).is_err());

        let mut manifest = valid_manifest();
        manifest.routes[0].methods.clear();
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn test_validate_manifest_prefix_and_config() {
        let mut manifest = valid_manifest();
        manifest.url_prefix = Some("docs".to_string());
        assert!(validate_manifest(&manifest).is_err());

        let mut manifest = valid_manifest();
        manifest.config = json!([1, 2]);
        assert!(validate_manifest(&manifest).is_err());
    }

    // ---- load_manifest ----

    #[test]
    fn test_load_manifest_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = load_manifest(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("No plugin.json found"));
    }

    #[test]
    fn test_load_manifest_malformed_json() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(matches!(
            load_manifest(tmp.path()),
            Err(ExpotionError::Json(_))
        ));
    }

    #[test]
    fn test_load_manifest_missing_routes() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE),
            r#"{"name": "incomplete", "version": "1.0.0"}"#,
        )
        .unwrap();
        assert!(load_manifest(tmp.path()).is_err());
    }

    // ---- ManifestDirSource ----

    #[test]
    fn test_scan_nonexistent_directory() {
        let source = ManifestDirSource::new("/nonexistent/expotion/plugins");
        assert!(source.scan().unwrap().is_empty());
        assert!(source.discover().unwrap().is_empty());
    }

    #[test]
    fn test_scan_skips_files_hidden_and_underscored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("not-a-dir.txt"), "hello").unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();

        let mut hidden = valid_manifest();
        hidden.name = "hidden".to_string();
        write_manifest(&tmp.path().join(".hidden"), &hidden);

        let mut private = valid_manifest();
        private.name = "private".to_string();
        write_manifest(&tmp.path().join("_private"), &private);

        write_manifest(&tmp.path().join("docs"), &valid_manifest());

        let plugins = ManifestDirSource::new(tmp.path()).scan().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name(), "docs");
        assert_eq!(plugins[0].path(), tmp.path().join("docs"));
    }

    #[test]
    fn test_scan_skips_invalid_manifests() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("docs"), &valid_manifest());

        let broken = tmp.path().join("broken");
        fs::create_dir(&broken).unwrap();
        fs::write(broken.join(MANIFEST_FILE), "{ broken json").unwrap();

        let plugins = ManifestDirSource::new(tmp.path()).scan().unwrap();
        assert_eq!(plugins.len(), 1);
    }

    #[test]
    fn test_discover_entries_carry_local_source() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("docs-dir"), &valid_manifest());

        let source = ManifestDirSource::new(tmp.path());
        assert!(source.label().starts_with("local:"));

        let entries = source.discover().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "docs");
        assert_eq!(entries[0].source, "local:docs-dir");
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("docs"), &valid_manifest());

        let entries = vec![
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied",
            )),
            Ok(tmp.path().join("docs")),
            Ok(tmp.path().join("missing")),
        ];
        let dirs = plugin_dirs(tmp.path(), entries);
        assert_eq!(dirs, vec![tmp.path().join("docs")]);
    }

    // ---- ManifestPlugin ----

    #[test]
    fn test_manifest_plugin_registers_routes() {
        let manifest: PluginManifest = serde_json::from_value(json!({
            "name": "status",
            "version": "0.2.0",
            "url_prefix": "/sys",
            "routes": [
                { "rule": "/health", "content_type": "application/json", "body": "{\"ok\":true}" },
                { "rule": "/gone", "status": 410, "body": "gone" }
            ],
            "menu": [ { "title": "Status", "url": "/sys/health" } ]
        }))
        .unwrap();

        let mut plugin = ManifestPlugin::new(manifest, PathBuf::from("/tmp/status"));
        let app = Application::new(AppConfig::default());
        plugin.init_app(&app).unwrap();

        assert!(app.has_blueprint("status"));
        let ok = app.dispatch(&Request::get("/sys/health"));
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.content_type, "application/json");
        assert_eq!(ok.body, "{\"ok\":true}");
        assert_eq!(app.dispatch(&Request::get("/sys/gone")).status, StatusCode::GONE);
        assert_eq!(plugin.menu_items()[0].title, "Status");
    }

    #[test]
    fn test_manifest_plugin_configure() {
        let mut manifest = valid_manifest();
        manifest.config = json!({ "theme": "dark" });
        let mut plugin = ManifestPlugin::new(manifest, PathBuf::from("/tmp/docs"));
        assert_eq!(plugin.config(), &json!({ "theme": "dark" }));

        plugin.configure(&json!({ "theme": "light" })).unwrap();
        assert_eq!(plugin.config(), &json!({ "theme": "light" }));
        assert_eq!(plugin.default_config(), json!({ "theme": "dark" }));
    }
}
