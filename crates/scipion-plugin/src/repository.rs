//! The catalog of installable plugins.

use crate::{InstallContext, PluginError, PluginInfo};
use console::style;
use futures::future::join_all;
use reqwest::Client;
use scipion_build::Environment;
use scipion_registry::{Catalog, CatalogFetch, CatalogSource, ProjectIndex};
use scipion_types::{split_bin_name, NULL_VERSION};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// Plugins listed by a catalog, completed with index metadata.
///
/// Loaded plugins are kept between calls; a failed fetch returns what was
/// loaded before.
#[derive(Debug)]
pub struct PluginRepository<I> {
    source: CatalogSource,
    index: I,
    client: Client,
    plugins: BTreeMap<String, PluginInfo>,
}

impl<I: ProjectIndex> PluginRepository<I> {
    pub fn new(source: CatalogSource, index: I) -> Self {
        Self::with_client(source, index, Client::new())
    }

    pub fn with_client(source: CatalogSource, index: I, client: Client) -> Self {
        Self {
            source,
            index,
            client,
            plugins: BTreeMap::new(),
        }
    }

    pub fn source(&self) -> &CatalogSource {
        &self.source
    }

    /// Plugins loaded so far, by pip name.
    pub fn plugins(&self) -> &BTreeMap<String, PluginInfo> {
        &self.plugins
    }

    /// Download the catalog without printing anything, so callers can
    /// clear their progress output before [`apply_fetch`](Self::apply_fetch)
    /// reports on it.
    pub async fn fetch_catalog(&self) -> Result<CatalogFetch, PluginError> {
        Ok(self.source.fetch(&self.client).await?)
    }

    /// Load `names` (every listed plugin by default) from a fetched catalog.
    ///
    /// Network problems are reported and leave the loaded plugins as they were.
    pub async fn apply_fetch(&mut self, fetched: CatalogFetch, names: Option<&[String]>, ctx: &InstallContext) {
        match fetched {
            CatalogFetch::Loaded(catalog) => self.load_catalog(catalog, names, ctx).await,
            CatalogFetch::Unreachable(message) => {
                println!(
                    "\nWARNING: Error while trying to connect with a server:\n  > Please, check your internet connection!\n"
                );
                println!("{}", message);
            }
            CatalogFetch::Unavailable(status) => {
                debug!("Plugin repository answered {}", status);
                println!("WARNING: Can't get Scipion's plugin list, the plugin repository is not available");
            }
            CatalogFetch::Invalid(message) => {
                debug!("Undecodable plugin list: {}", message);
                println!("WARNING: Can't get Scipion's plugin list, the plugin repository sent an invalid answer");
            }
        }
    }

    /// Load the `names` entries of `catalog`, all of them when `None`.
    ///
    /// Entries are completed from the index only when the catalog comes from
    /// a URL. Plugins without a release compatible with the running core are
    /// left out.
    pub async fn load_catalog(&mut self, catalog: Catalog, names: Option<&[String]>, ctx: &InstallContext) {
        let selected: Vec<&String> = match names {
            None => catalog.keys().collect(),
            Some(names) => {
                let requested: BTreeSet<&String> = names.iter().collect();
                let unmatched: Vec<&str> = requested
                    .iter()
                    .filter(|n| !catalog.contains_key(n.as_str()))
                    .map(|n| n.as_str())
                    .collect();
                if !unmatched.is_empty() {
                    println!("WARNING - The following plugins didn't match available plugin names:");
                    println!("{}", unmatched.join(" "));
                    println!(
                        "You can see the list of available plugins with the following command:\nscipion installp --help"
                    );
                }
                requested.into_iter().filter(|n| catalog.contains_key(n.as_str())).collect()
            }
        };

        let remote = self.source.uses_index();
        let index = &self.index;
        let infos = join_all(
            selected
                .iter()
                .map(|key| PluginInfo::from_entry(&catalog[key.as_str()], remote, index, ctx)),
        )
        .await;

        for (key, info) in selected.into_iter().zip(infos) {
            if info.latest_release() == NULL_VERSION {
                debug!("{} has no release for core {}", key, ctx.core_version);
                continue;
            }
            self.plugins.insert(key.clone(), info);
        }
    }

    /// Loaded plugins, `[X]` marking installed ones.
    ///
    /// `with_bins` lists only installed plugins, each followed by its
    /// binaries; `with_updates` flags installed plugins with a newer release.
    pub fn format_plugins(&self, with_bins: bool, with_updates: bool, ctx: &InstallContext) -> String {
        if self.plugins.is_empty() {
            return "List of available plugins in plugin repository inaccessible at this time.".to_string();
        }

        let title = if with_bins {
            format!("Installed plugins and their {}", style("binaries").green())
        } else {
            "Available plugins".to_string()
        };
        let mut out = format!("{}: ([ ] not installed, [X] seems already installed)\n\n", title);

        for (name, plugin) in &self.plugins {
            if with_bins && !plugin.is_installed() {
                continue;
            }
            let mark = if plugin.is_installed() { 'X' } else { ' ' };
            let _ = write!(out, "{:30} {:10} [{}]", name, plugin.pip_version(), mark);
            if with_updates && plugin.is_installed() && plugin.latest_release() != plugin.pip_version() {
                let _ = write!(
                    out,
                    "{}",
                    style(format!("\t({} available)", plugin.latest_release())).yellow()
                );
            }
            out.push('\n');
            if with_bins {
                let _ = write!(out, "{}", style(plugin.render_bin_info(ctx)).green());
            }
        }
        out
    }
}

/// Binary name (versioned and bare) to the plugin declaring it.
///
/// When two plugins declare the same name the one registered last, in
/// name order, keeps it.
pub fn bin_to_plugin(ctx: &InstallContext) -> BTreeMap<String, String> {
    let mut owners = BTreeMap::new();
    for (name, plugin) in ctx.plugins.iter() {
        let info = PluginInfo::for_plugin(name, Arc::clone(plugin), ctx);
        for bin in info.bin_versions() {
            owners.insert(bin.clone(), name.to_string());
            owners.insert(split_bin_name(bin).0.to_string(), name.to_string());
        }
    }
    owners
}

/// One environment holding the binaries of every known plugin.
pub fn all_binaries(ctx: &InstallContext) -> Environment {
    let mut env = ctx.environment_with(ctx.default_options());
    env.set_default(false);
    for (name, plugin) in ctx.plugins.iter() {
        if let Err(e) = plugin.define_binaries(&mut env) {
            println!(
                "{}{}",
                style(format!("Error retrieving plugin {} binaries: ", name)).red(),
                e
            );
        }
    }
    env
}
