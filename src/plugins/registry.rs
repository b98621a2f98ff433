//! Plugin registry for Expotion
//!
//! This module provides the `PluginRegistry` struct holding the plugin
//! instances accepted by the loader. It keeps registration order, refuses a
//! second plugin with an already-registered name, and computes the
//! dependency-respecting initialization order.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::types::LoadedPlugin;

/// Outcome of [`PluginRegistry::register`].
#[derive(Debug)]
pub enum Registration {
    Registered,
    /// A plugin with this name is already registered; the new instance is
    /// handed back untouched.
    Duplicate(LoadedPlugin),
}

/// Ordered collection of loaded plugins indexed by name.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<LoadedPlugin>,
    index: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. The first plugin registered under a name wins.
    pub fn register(&mut self, plugin: LoadedPlugin) -> Registration {
        let name = plugin.name().to_string();
        if self.index.contains_key(&name) {
            return Registration::Duplicate(plugin);
        }

        debug!(plugin = %name, source = %plugin.source, "Registered plugin");
        self.index.insert(name, self.plugins.len());
        self.plugins.push(plugin);
        Registration::Registered
    }

    pub fn get(&self, name: &str) -> Option<&LoadedPlugin> {
        self.index.get(name).map(|&i| &self.plugins[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LoadedPlugin> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.plugins[i]),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Remove a plugin and return it.
    pub fn remove(&mut self, name: &str) -> Option<LoadedPlugin> {
        let position = self.index.remove(name)?;
        let removed = self.plugins.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Remove every plugin, in registration order.
    pub fn drain(&mut self) -> Vec<LoadedPlugin> {
        self.index.clear();
        std::mem::take(&mut self.plugins)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins in their current order.
    pub fn iter(&self) -> impl Iterator<Item = &LoadedPlugin> {
        self.plugins.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Names in an order where every plugin follows the registered plugins it
    /// depends on. Depth-first, visiting in registration order; unknown
    /// dependencies are ignored and a cycle is cut at the first revisit.
    pub fn dependency_order(&self) -> Vec<String> {
        fn visit(
            registry: &PluginRegistry,
            name: &str,
            visited: &mut HashSet<String>,
            out: &mut Vec<String>,
        ) {
            if !visited.insert(name.to_string()) {
                return;
            }
            if let Some(loaded) = registry.get(name) {
                for dep in loaded.plugin.dependencies() {
                    if registry.contains(&dep) {
                        visit(registry, &dep, visited, out);
                    }
                }
                out.push(name.to_string());
            }
        }

        let mut visited = HashSet::new();
        let mut out = Vec::with_capacity(self.plugins.len());
        for loaded in &self.plugins {
            visit(self, loaded.name(), &mut visited, &mut out);
        }
        out
    }

    /// Reorder the stored plugins to match `order`. Names not in `order`
    /// keep their relative position at the end.
    pub fn reorder(&mut self, order: &[String]) {
        let mut remaining = std::mem::take(&mut self.plugins);
        let mut sorted = Vec::with_capacity(remaining.len());
        for name in order {
            if let Some(pos) = remaining.iter().position(|p| p.name() == name) {
                sorted.push(remaining.remove(pos));
            }
        }
        sorted.extend(remaining);

        self.index = sorted
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name().to_string(), i))
            .collect();
        self.plugins = sorted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::plugins::types::Plugin;

    struct Named {
        name: &'static str,
        deps: Vec<String>,
    }

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        fn init_app(&mut self, _app: &Application) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn make_plugin(name: &'static str, deps: &[&str]) -> LoadedPlugin {
        LoadedPlugin::new(
            Box::new(Named {
                name,
                deps: deps.iter().map(|d| d.to_string()).collect(),
            }),
            format!("static:{}", name),
        )
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PluginRegistry::new();
        assert!(matches!(
            registry.register(make_plugin("alpha", &[])),
            Registration::Registered
        ));
        let found = registry.get("alpha").unwrap();
        assert_eq!(found.source, "static:alpha");
        assert!(registry.contains("alpha"));
    }

    #[test]
    fn test_duplicate_name_is_handed_back() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("alpha", &[]));
        match registry.register(make_plugin("alpha", &[])) {
            Registration::Duplicate(p) => assert_eq!(p.name(), "alpha"),
            Registration::Registered => panic!("duplicate accepted"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("a", &[]));
        registry.register(make_plugin("b", &[]));
        registry.register(make_plugin("c", &[]));

        assert_eq!(registry.remove("a").unwrap().name(), "a");
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.get("c").unwrap().name(), "c");
        assert_eq!(registry.names(), vec!["b", "c"]);
    }

    #[test]
    fn test_dependency_order() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("reports", &["auth", "db"]));
        registry.register(make_plugin("auth", &["db"]));
        registry.register(make_plugin("db", &["missing"]));
        registry.register(make_plugin("standalone", &[]));

        assert_eq!(
            registry.dependency_order(),
            vec!["db", "auth", "reports", "standalone"]
        );
    }

    #[test]
    fn test_dependency_cycle_terminates() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("a", &["b"]));
        registry.register(make_plugin("b", &["a"]));

        let order = registry.dependency_order();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_reorder() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("x", &["y"]));
        registry.register(make_plugin("y", &[]));

        let order = registry.dependency_order();
        registry.reorder(&order);
        assert_eq!(registry.names(), vec!["y", "x"]);
        assert_eq!(registry.get("x").unwrap().name(), "x");
    }

    #[test]
    fn test_drain() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("a", &[]));
        registry.register(make_plugin("b", &[]));
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(!registry.contains("a"));
    }
}
