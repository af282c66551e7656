//! `installp`, `uninstallp` and `plugins`.

use super::{diagnose, spinner, ui, EngineFlags};
use crate::session::Session;
use miette::Result;
use regex::Regex;
use scipion_plugin::{InstallContext, PluginInfo};
use std::path::Path;
use std::sync::LazyLock;

static GITHUB_REPO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://github.com/(.*)/(.*)\.git").unwrap());

/// One `-p name [version]` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRequest {
    pub name: String,
    pub version: Option<String>,
}

impl PluginRequest {
    pub fn parse_all(values: Vec<Vec<String>>) -> Vec<Self> {
        values
            .into_iter()
            .filter_map(|value| {
                let mut parts = value.into_iter();
                let name = parts.next()?;
                Some(Self {
                    name,
                    version: parts.next(),
                })
            })
            .collect()
    }
}

/// Plugin name of a devel source: the folder name of a local path, or the
/// repository name of a GitHub URL.
pub(crate) fn devel_plugin_name(source: &str) -> Option<String> {
    let path = Path::new(source);
    if path.exists() {
        let absolute = std::path::absolute(path).ok()?;
        return absolute
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty());
    }
    GITHUB_REPO
        .captures(source)
        .map(|c| c[2].to_string())
        .filter(|n| !n.is_empty())
}

fn install_one(
    plugin: &mut PluginInfo,
    version: Option<&str>,
    with_bins: bool,
    ctx: &InstallContext,
) -> Result<bool> {
    if !plugin.install_pip_module(version, ctx).map_err(diagnose)? {
        return Ok(false);
    }
    if with_bins {
        plugin.install_bin(ctx, ctx.default_options()).map_err(diagnose)?;
    }
    ui::success(format!("Plugin {} installed", ui::pkg(plugin.pip_name())));
    Ok(true)
}

/// Install catalog plugins, each at the requested or latest compatible version.
pub async fn install_plugins(
    session: &Session,
    requests: &[PluginRequest],
    no_bin: bool,
    flags: &EngineFlags,
) -> Result<bool> {
    if requests.is_empty() {
        return list_plugins(session, false, false).await;
    }

    let ctx = session.context(flags);
    let with_bins = session.config.install_binaries && !no_bin;
    let names: Vec<String> = requests.iter().map(|r| r.name.clone()).collect();

    let mut repo = session.repository();
    let progress = spinner("Fetching plugin catalog...");
    let fetched = repo.fetch_catalog().await;
    progress.finish_and_clear();
    repo.apply_fetch(fetched.map_err(diagnose)?, Some(&names), &ctx).await;
    let plugins = repo.plugins();

    if plugins.is_empty() {
        return Ok(false);
    }

    let mut ok = true;
    for request in requests {
        let Some(plugin) = plugins.get(&request.name) else {
            println!("WARNING: Plugin {} does not exist.", request.name);
            ok = false;
            continue;
        };
        let mut plugin = plugin.clone();
        ok &= install_one(&mut plugin, request.version.as_deref(), with_bins, &ctx)?;
    }
    Ok(ok)
}

/// Install plugins from local checkouts (editable) or git URLs.
pub fn install_devel_plugins(
    session: &Session,
    requests: &[PluginRequest],
    no_bin: bool,
    flags: &EngineFlags,
) -> Result<bool> {
    let ctx = session.context(flags);
    let with_bins = session.config.install_binaries && !no_bin;

    let mut ok = true;
    for request in requests {
        let source = &request.name;
        let Some(name) = devel_plugin_name(source) else {
            ui::error(format!("ERROR: Couldn't find pluginName for source {}", source));
            ok = false;
            continue;
        };
        let mut plugin = PluginInfo::offline(&name, &name, source, &ctx);
        ok &= install_one(&mut plugin, None, with_bins, &ctx)?;
    }
    Ok(ok)
}

/// Uninstall plugins, their binaries first unless `no_bin`.
pub fn uninstall_plugins(session: &Session, names: &[String], no_bin: bool) -> Result<bool> {
    if names.is_empty() {
        println!("Incorrect usage of command 'uninstallp'. Execute 'scipion uninstallp --help' for more details.");
        return Ok(true);
    }

    let ctx = &session.ctx;
    let mut ok = true;
    for name in names {
        let mut plugin = PluginInfo::offline(name, name, "", ctx);
        if !plugin.is_installed() {
            println!("WARNING: Plugin {} is not installed.", name);
            continue;
        }
        if session.config.install_binaries && !no_bin {
            plugin.uninstall_bins(ctx, None).map_err(diagnose)?;
        }
        if !plugin.uninstall_pip(ctx).map_err(diagnose)? {
            ui::error(format!("pip could not uninstall {}", name));
            ok = false;
        }
    }
    Ok(ok)
}

/// Print the catalog listing.
pub async fn list_plugins(session: &Session, with_bins: bool, with_updates: bool) -> Result<bool> {
    let mut repo = session.repository();
    let progress = spinner("Fetching plugin catalog...");
    let fetched = repo.fetch_catalog().await;
    progress.finish_and_clear();
    repo.apply_fetch(fetched.map_err(diagnose)?, None, &session.ctx).await;

    println!("{}", repo.format_plugins(with_bins, with_updates, &session.ctx));
    Ok(true)
}
