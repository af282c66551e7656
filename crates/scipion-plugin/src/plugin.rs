//! The plugin capability and the registry of known plugins.

use crate::{discover_manifests, PluginError};
use scipion_build::Environment;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A plugin as seen by the installer: something that can describe its binaries.
pub trait Plugin: fmt::Debug + Send + Sync {
    /// Name the plugin is registered under (its top-level package folder).
    fn name(&self) -> &str;

    /// Register the plugin binaries on `env`.
    ///
    /// Called with a fresh environment every time, also just to list the
    /// binaries, so it must not have side effects.
    fn define_binaries(&self, env: &mut Environment) -> Result<(), PluginError>;
}

/// Known plugins by name. Registering a name twice keeps the last one.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every manifest plugin found under `dirs`.
    pub fn discover(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::new();
        for plugin in discover_manifests(dirs) {
            registry.register(Arc::new(plugin));
        }
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Plugins sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Plugin>)> {
        self.plugins.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.plugins.keys()).finish()
    }
}
