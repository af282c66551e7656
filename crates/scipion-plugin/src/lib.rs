//! Scipion plugins.
//!
//! This crate ties the package index and the build engine together:
//! - [`Plugin`] objects register their binaries into an `Environment`
//! - declarative `binaries.toml` manifests are discovered on disk
//! - installed pip distributions are read from site-packages
//! - [`PluginInfo`] reconciles index and local state for one plugin
//! - [`PluginRepository`] resolves the catalog of known plugins

mod discovery;
mod dist;
mod info;
mod manifest;
mod plugin;
mod repository;

pub use discovery::{discover_manifests, load_plugin_dir, MANIFEST_FILE};
pub use dist::{Distribution, SitePackages};
pub use info::PluginInfo;
pub use manifest::{BinariesManifest, ManifestPlugin};
pub use plugin::{Plugin, PluginRegistry};
pub use repository::{all_binaries, bin_to_plugin, PluginRepository};

use scipion_build::{BuildError, EnvOptions, Environment, Layout};
use scipion_registry::RegistryError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid binaries manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to run {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot pass {value:?} to the shell")]
    Quote {
        value: String,
        #[source]
        source: shlex::QuoteError,
    },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Everything an install run shares: folders, engine options, the running
/// core version and the known plugins.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub layout: Layout,
    pub options: EnvOptions,
    pub core_version: String,
    pub plugins: Arc<PluginRegistry>,
}

impl InstallContext {
    pub fn new(layout: Layout, options: EnvOptions, core_version: impl Into<String>, plugins: PluginRegistry) -> Self {
        Self {
            layout,
            options,
            core_version: core_version.into(),
            plugins: Arc::new(plugins),
        }
    }

    /// A fresh environment with the run options.
    pub fn environment(&self) -> Environment {
        self.environment_with(self.options.clone())
    }

    pub fn environment_with(&self, options: EnvOptions) -> Environment {
        Environment::new(self.layout.clone(), options)
    }

    /// Run options without explicit targets, so the defaults install.
    pub fn default_options(&self) -> EnvOptions {
        EnvOptions {
            targets: Vec::new(),
            ..self.options.clone()
        }
    }

    pub fn site_packages(&self) -> SitePackages {
        SitePackages::new(self.layout.site_packages())
    }

    pub fn python(&self) -> &str {
        &self.options.python
    }

    /// The plugin registered as `name`, else one installed into
    /// site-packages after the registry was built.
    pub fn resolve_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        if let Some(plugin) = self.plugins.get(name) {
            return Some(plugin);
        }
        match load_plugin_dir(&self.layout.site_packages().join(name)) {
            Ok(Some(plugin)) => Some(Arc::new(plugin)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }
}
