//! What is known about one plugin: index metadata, installed distribution
//! and declared binaries.

use crate::{InstallContext, Plugin, PluginError};
use console::style;
use scipion_build::{remove_package, EnvOptions, Environment, PipModuleOptions};
use scipion_registry::{compatible_releases, CatalogEntry, CompatibleReleases, ProjectIndex};
use scipion_types::{PipSource, NULL_VERSION};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing::{debug, warn};

/// A plugin reconciled from the package index (or a source checkout) and
/// the local site-packages.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pip_name: String,
    name: String,
    source_url: String,
    remote: bool,

    home_page: String,
    summary: String,
    author: String,
    email: String,
    compatible: CompatibleReleases,

    installed: bool,
    pip_version: String,
    dir_name: String,
    bin_versions: Vec<String>,

    plugin: Option<Arc<dyn Plugin>>,
}

impl PluginInfo {
    fn blank(pip_name: &str, name: &str, source_url: &str, remote: bool) -> Self {
        Self {
            pip_name: pip_name.to_string(),
            name: name.to_string(),
            source_url: source_url.to_string(),
            remote,
            home_page: String::new(),
            summary: String::new(),
            author: String::new(),
            email: String::new(),
            compatible: CompatibleReleases::none(),
            installed: false,
            pip_version: String::new(),
            dir_name: String::new(),
            bin_versions: Vec::new(),
            plugin: None,
        }
    }

    /// Plugin described by the package index.
    ///
    /// An index failure leaves no compatible release, so the plugin cannot
    /// be installed.
    pub async fn from_index<I: ProjectIndex>(
        pip_name: &str,
        name: &str,
        source_url: &str,
        index: &I,
        ctx: &InstallContext,
    ) -> Self {
        let mut info = Self::blank(pip_name, name, source_url, true);

        match index.project(pip_name).await {
            Ok(Some(project)) => {
                info.home_page = project.info.home_page();
                info.summary = project.info.summary();
                info.author = project.info.author();
                info.email = project.info.email();
                info.compatible = compatible_releases(pip_name, &project.releases, &ctx.core_version);
            }
            Ok(None) => println!("Warning: Couldn't get remote plugin data for {}", pip_name),
            Err(e) => {
                warn!("{}", e);
                println!("Warning: Couldn't get remote plugin data for {}", pip_name);
            }
        }

        info.refresh_local(ctx);
        info
    }

    /// Plugin not looked up on the index: a source checkout (devel mode)
    /// or a catalog read from a local file. Its only release is the devel one.
    pub fn offline(pip_name: &str, name: &str, source_url: &str, ctx: &InstallContext) -> Self {
        let mut info = Self::blank(pip_name, name, source_url, false);
        info.home_page = source_url.to_string();
        info.compatible = CompatibleReleases::devel();
        info.author = " Developer mode".to_string();
        info.refresh_local(ctx);
        info
    }

    /// A catalog entry, completed from the index when `remote`.
    pub async fn from_entry<I: ProjectIndex>(
        entry: &CatalogEntry,
        remote: bool,
        index: &I,
        ctx: &InstallContext,
    ) -> Self {
        if remote {
            Self::from_index(&entry.pip_name, &entry.name, &entry.plugin_source_url, index, ctx).await
        } else {
            Self::offline(&entry.pip_name, &entry.name, &entry.plugin_source_url, ctx)
        }
    }

    /// An already known plugin object, named after its package folder.
    pub fn for_plugin(name: &str, plugin: Arc<dyn Plugin>, ctx: &InstallContext) -> Self {
        let mut info = Self::offline(name, name, "", ctx);
        info.plugin = Some(plugin);
        info.bin_versions = info.binary_names(ctx);
        info
    }

    pub fn pip_name(&self) -> &str {
        &self.pip_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn home_page(&self) -> &str {
        &self.home_page
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn compatible_releases(&self) -> &CompatibleReleases {
        &self.compatible
    }

    pub fn latest_release(&self) -> &str {
        self.compatible.latest()
    }

    /// Upload date of a compatible release.
    pub fn release_date(&self, release: &str) -> Option<&str> {
        self.compatible
            .release(release)
            .and_then(|file| file.upload_time.as_deref())
    }

    /// Whether the distribution is present in site-packages.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Installed distribution version, empty when not installed.
    pub fn pip_version(&self) -> &str {
        &self.pip_version
    }

    /// Package folder of the plugin code, from `top_level.txt`.
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    pub fn bin_versions(&self) -> &[String] {
        &self.bin_versions
    }

    /// Re-read the installed distribution and the binaries it declares.
    pub fn refresh_local(&mut self, ctx: &InstallContext) {
        let Some(dist) = ctx.site_packages().find(&self.pip_name) else {
            self.installed = false;
            self.pip_version.clear();
            if self.plugin.is_none() {
                self.bin_versions.clear();
            }
            return;
        };

        self.installed = true;
        self.pip_version = dist.version().to_string();
        self.dir_name = dist.top_level().unwrap_or_default();

        if !self.remote {
            self.home_page = dist.home_page().to_string();
            self.summary = dist.summary().to_string();
            self.author = dist.author().to_string();
            self.email = dist.author_email().to_string();
        }

        self.bin_versions = self.binary_names(ctx);
    }

    fn resolve_plugin(&self, ctx: &InstallContext) -> Option<Arc<dyn Plugin>> {
        if let Some(plugin) = &self.plugin {
            return Some(Arc::clone(plugin));
        }
        let dir = if self.dir_name.is_empty() {
            &self.name
        } else {
            &self.dir_name
        };
        if dir.is_empty() {
            return None;
        }
        ctx.resolve_plugin(dir)
    }

    /// Names of every target the plugin defines, aliases excluded.
    fn binary_names(&self, ctx: &InstallContext) -> Vec<String> {
        let Some(plugin) = self.resolve_plugin(ctx) else {
            return Vec::new();
        };

        let mut env = ctx.environment_with(ctx.default_options());
        env.set_default(false);
        if let Err(e) = plugin.define_binaries(&mut env) {
            println!(
                "{}{}",
                style(format!("Error retrieving plugin {} binaries: ", self.name)).red(),
                e
            );
        }
        env.targets().iter().map(|t| t.name().to_string()).collect()
    }

    /// Where pip installs `version` from, and the site-packages entry it
    /// is expected to leave behind.
    pub fn install_source(&self, version: &str) -> (PipSource, String) {
        let underscored = format!("{}*", self.pip_name.replace('-', "_"));
        if self.source_url.is_empty() {
            return (
                PipSource::Index {
                    name: self.pip_name.clone(),
                    version: version.to_string(),
                },
                underscored,
            );
        }

        let path = Path::new(&self.source_url);
        if path.exists() {
            let target = if path.join("pyproject.toml").exists() {
                underscored
            } else {
                format!("{}*", self.pip_name)
            };
            (PipSource::Editable(path.to_path_buf()), target)
        } else {
            (PipSource::Git(self.source_url.clone()), underscored)
        }
    }

    /// Install `version` (the latest compatible one by default) with pip.
    ///
    /// Returns `Ok(false)` without running pip when the version is not
    /// compatible with the running core.
    pub fn install_pip_module(&mut self, version: Option<&str>, ctx: &InstallContext) -> Result<bool, PluginError> {
        let version = match version.filter(|v| !v.is_empty()) {
            None => self.latest_release().to_string(),
            Some(v) if self.compatible.contains(v) => v.to_string(),
            Some(v) => {
                if self.compatible.is_empty() {
                    println!(
                        "{} has no compatible versions with current Scipion version {}.",
                        self.pip_name, ctx.core_version
                    );
                } else {
                    println!(
                        "{} version {} not compatible with current Scipion version {}.",
                        self.pip_name, v, ctx.core_version
                    );
                    println!(
                        "Please choose a compatible release: {}",
                        self.compatible.versions().join(" ")
                    );
                }
                return Ok(false);
            }
        };

        if version == NULL_VERSION {
            println!(
                "Plugin {} is not available for this Scipion {} yet",
                self.pip_name, ctx.core_version
            );
            return Ok(false);
        }

        let (source, target) = self.install_source(&version);
        let args = source.shell_args().map_err(|e| PluginError::Quote {
            value: source.to_string(),
            source: e,
        })?;
        let pip_cmd = format!("{} -m pip install {}", ctx.python(), args);
        debug!("Installing {} from {}", self.pip_name, source);

        let mut env = ctx.environment_with(ctx.default_options());
        env.add_pip_module(
            &self.pip_name,
            PipModuleOptions {
                version,
                pip_cmd: Some(pip_cmd),
                target: Some(target),
                ..Default::default()
            },
        )?;
        env.execute()?;

        self.refresh_local(ctx);
        Ok(true)
    }

    /// Environment with the plugin binaries defined, `None` when the plugin
    /// object cannot be found.
    pub fn install_env(&self, ctx: &InstallContext, options: EnvOptions) -> Option<Environment> {
        let Some(plugin) = self.resolve_plugin(ctx) else {
            println!("Warning: couldn't find Plugin for {}", self.pip_name);
            println!("Dirname: {}", self.dir_name);
            return None;
        };

        let mut env = ctx.environment_with(options);
        env.set_default(false);
        if let Err(e) = plugin.define_binaries(&mut env) {
            println!("Couldn't get binaries definition of {} plugin: {}", self.name, e);
        }
        Some(env)
    }

    /// Install the binaries selected by `options`, the default ones when it
    /// names no targets.
    pub fn install_bin(&self, ctx: &InstallContext, options: EnvOptions) -> Result<(), PluginError> {
        if let Some(env) = self.install_env(ctx, options) {
            env.execute()?;
        }
        Ok(())
    }

    /// Pip module, then default binaries.
    pub fn install(&mut self, ctx: &InstallContext) -> Result<bool, PluginError> {
        if !self.install_pip_module(None, ctx)? {
            return Ok(false);
        }
        self.install_bin(ctx, ctx.default_options())?;
        self.refresh_local(ctx);
        Ok(true)
    }

    /// Remove installed binaries, all the ones the plugin declares by default.
    ///
    /// Names may be versioned (`relion-4.0`) or the unversioned link.
    pub fn uninstall_bins(&self, ctx: &InstallContext, bins: Option<&[String]>) -> Result<(), PluginError> {
        let bins = bins.unwrap_or(self.bin_versions.as_slice());
        for bin in bins {
            if !remove_package(ctx.layout.em_folder(), bin)? {
                println!("The binary {} does not exist ", bin);
            }
        }
        Ok(())
    }

    /// `python -m pip uninstall -y <pip name>`; returns whether pip succeeded.
    pub fn uninstall_pip(&mut self, ctx: &InstallContext) -> Result<bool, PluginError> {
        println!("Removing {} plugin...", self.pip_name);
        let pip_name = shlex::try_quote(&self.pip_name).map_err(|source| PluginError::Quote {
            value: self.pip_name.clone(),
            source,
        })?;
        let command = format!("{} -m pip uninstall -y {}", ctx.python(), pip_name);
        let status = process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .map_err(|source| PluginError::Spawn { command, source })?;

        self.refresh_local(ctx);
        Ok(status.success())
    }

    /// Binaries table of the plugin, without its header line.
    pub fn render_bin_info(&self, ctx: &InstallContext) -> String {
        let no_binaries = format!("{:14}No binaries information defined.\n", "");
        let Some(env) = self.install_env(ctx, ctx.default_options()) else {
            return no_binaries;
        };
        match env.render_help().split_once('\n') {
            Some((_, table)) => table.to_string(),
            None => no_binaries,
        }
    }
}
