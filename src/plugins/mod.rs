//! Plugin system for Expotion
//!
//! Plugins extend the host [`Application`](crate::app::Application), usually
//! by registering a blueprint with their own routes. The loader finds them
//! through pluggable discovery sources, builds one instance per entry, and
//! calls `init_app` on each.
//!
//! # Architecture
//!
//! - **types**: the `Plugin` trait and the values exchanged with the host
//! - **entry_points**: compiled-in registrations (`register_plugin!`), the
//!   `PluginSource` trait, and an explicit registration table
//! - **manifest**: data-driven plugins read from `<plugins_dir>/<name>/plugin.json`
//! - **registry**: ordered storage with duplicate detection and dependency ordering
//! - **loader**: the `load_all` pass and post-load introspection
//!
//! # Usage
//!
//! ```rust,no_run
//! use expotion::app::Application;
//! use expotion::config::AppConfig;
//! use expotion::plugins::PluginLoader;
//!
//! let app = Application::new(AppConfig::default());
//! let mut loader = PluginLoader::new(app.clone());
//! let report = loader.load_all().unwrap();
//!
//! println!("Initialized {} plugins", report.initialized.len());
//! ```

pub mod entry_points;
mod loader;
pub mod manifest;
pub mod registry;
pub mod types;

pub use inventory;

pub use entry_points::{
    entry_points, EntryPoint, EntryPointSource, PluginSource, StaticSource, ENTRY_POINT_GROUP,
};
pub use loader::{
    FailedPlugin, LoadReport, LoadStage, PluginLoader, SkipReason, SkippedPlugin,
    LOADER_EXTENSION,
};
pub use manifest::{ManifestDirSource, ManifestPlugin, PluginManifest, RouteDef};
pub use registry::PluginRegistry;
pub use types::{HealthStatus, LoadedPlugin, MenuItem, Plugin, PluginEntry, PluginInfo};
