//! Compiled-in plugin discovery
//!
//! Plugin crates advertise themselves with [`register_plugin!`], which
//! submits an [`EntryPoint`] into a link-time registration table collected by
//! `inventory`. The loader enumerates the table by group name, so linking a
//! plugin crate into the binary is enough to make it discoverable; the
//! loader's source never changes.
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct Alpha;
//! // impl Plugin for Alpha { ... }
//!
//! expotion::register_plugin!("alpha", Alpha::default());
//! ```
//!
//! Iteration order of the table is unspecified.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;

use super::types::{Plugin, PluginEntry};

/// Discovery group scanned by default.
pub const ENTRY_POINT_GROUP: &str = "expotion.plugins";

/// A compiled-in registration: `group` / `name` → constructor.
#[derive(Debug)]
pub struct EntryPoint {
    pub group: &'static str,
    pub name: &'static str,
    pub factory: fn() -> anyhow::Result<Box<dyn Plugin>>,
}

inventory::collect!(EntryPoint);

/// All compiled-in entry points registered under `group`.
pub fn entry_points(group: &str) -> Vec<&'static EntryPoint> {
    inventory::iter::<EntryPoint>
        .into_iter()
        .filter(|ep| ep.group == group)
        .collect()
}

/// Register a plugin constructor under the default group (or an explicit one).
///
/// The constructor expression is evaluated on every `load_all`, so each pass
/// gets a fresh instance.
#[macro_export]
macro_rules! register_plugin {
    (group = $group:expr, $name:expr, $ctor:expr $(,)?) => {
        $crate::plugins::inventory::submit! {
            $crate::plugins::EntryPoint {
                group: $group,
                name: $name,
                factory: || {
                    ::std::result::Result::Ok(
                        ::std::boxed::Box::new($ctor)
                            as ::std::boxed::Box<dyn $crate::plugins::Plugin>,
                    )
                },
            }
        }
    };
    ($name:expr, $ctor:expr $(,)?) => {
        $crate::register_plugin!(group = $crate::plugins::ENTRY_POINT_GROUP, $name, $ctor);
    };
}

/// Something that can enumerate plugin entries.
#[cfg_attr(test, mockall::automock)]
pub trait PluginSource {
    /// Short label used in logs and in `PluginEntry::source`.
    fn label(&self) -> String;

    /// List entries. An error here aborts `load_all`.
    fn discover(&self) -> Result<Vec<PluginEntry>>;
}

/// Source backed by the `inventory` registration table.
#[derive(Debug, Clone)]
pub struct EntryPointSource {
    group: String,
}

impl EntryPointSource {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Default for EntryPointSource {
    fn default() -> Self {
        Self::new(ENTRY_POINT_GROUP)
    }
}

impl PluginSource for EntryPointSource {
    fn label(&self) -> String {
        format!("entry_points:{}", self.group)
    }

    fn discover(&self) -> Result<Vec<PluginEntry>> {
        let entries: Vec<PluginEntry> = entry_points(&self.group)
            .into_iter()
            .map(|ep| {
                let factory = ep.factory;
                PluginEntry::new(ep.name, format!("entry:{}", ep.name), move || factory())
            })
            .collect();
        debug!(group = %self.group, count = entries.len(), "Enumerated entry points");
        Ok(entries)
    }
}

type SharedFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;

/// An explicit registration table built by the host at startup.
#[derive(Clone, Default)]
pub struct StaticSource {
    entries: Vec<(String, SharedFactory)>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`StaticSource::add`].
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.add(name, factory);
        self
    }

    pub fn add<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(factory)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PluginSource for StaticSource {
    fn label(&self) -> String {
        "static".to_string()
    }

    fn discover(&self) -> Result<Vec<PluginEntry>> {
        Ok(self
            .entries
            .iter()
            .map(|(name, factory)| {
                let factory = Arc::clone(factory);
                PluginEntry::new(name.clone(), format!("static:{}", name), move || factory())
            })
            .collect())
    }
}
