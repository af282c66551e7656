//! Configuration, folders and known plugins, resolved once per run.

use crate::commands::EngineFlags;
use miette::Result;
use scipion_build::{EnvOptions, Layout};
use scipion_config::Config;
use scipion_diagnostics::ScipionError;
use scipion_platform::PythonInterpreter;
use scipion_plugin::{InstallContext, PluginRegistry, PluginRepository};
use scipion_registry::{CatalogSource, PypiClient};
use std::path::Path;
use tracing::debug;

pub struct Session {
    pub config: Config,
    pub ctx: InstallContext,
}

impl Session {
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_file).map_err(|e| ScipionError::config(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let site_packages = match &config.site_packages {
            Some(dir) => dir.clone(),
            None => {
                PythonInterpreter::detect(&config.python)
                    .map_err(|e| ScipionError::python(e.to_string()))?
                    .site_packages
            }
        };

        let layout = Layout::new(
            &config.software_dir,
            &config.em_root,
            &site_packages,
            &config.url_software,
        );
        let options = EnvOptions {
            python: config.python.clone(),
            cuda_lib: config.cuda_lib.clone(),
            cuda_bin: config.cuda_bin.clone(),
            ..EnvOptions::default()
        };

        let mut dirs = vec![site_packages];
        dirs.extend(config.plugin_dirs.iter().cloned());
        let plugins = PluginRegistry::discover(&dirs);
        debug!("Plugins defining binaries: {:?}", plugins);

        let ctx = InstallContext::new(layout, options, config.core_version.clone(), plugins);
        Ok(Self { config, ctx })
    }

    /// Install context running the engine as `flags` ask.
    pub fn context(&self, flags: &EngineFlags) -> InstallContext {
        let mut ctx = self.ctx.clone();
        ctx.options.processors = flags.jobs.max(1);
        ctx.options.show_only = flags.show;
        ctx.options.show_tree = flags.show_tree || flags.dot;
        ctx.options.dot = flags.dot;
        ctx
    }

    pub fn repository(&self) -> PluginRepository<PypiClient> {
        PluginRepository::new(
            CatalogSource::from_location(&self.config.plugin_repository),
            PypiClient::new(&self.config.pypi_url),
        )
    }
}
