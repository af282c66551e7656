//! Plugin discovery from package folders.
//!
//! A plugin folder is a top-level package folder (`<dir>/<name>/`)
//! containing a `binaries.toml`. The folder name is the plugin name.

use crate::{ManifestPlugin, PluginError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Name of the declarative binaries file inside a plugin folder.
pub const MANIFEST_FILE: &str = "binaries.toml";

/// Load the manifest plugin in `dir`, `None` when there is no manifest.
pub fn load_plugin_dir(dir: &Path) -> Result<Option<ManifestPlugin>, PluginError> {
    let manifest = dir.join(MANIFEST_FILE);
    if !manifest.is_file() {
        return Ok(None);
    }
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    ManifestPlugin::load(name, &manifest).map(Some)
}

/// Every manifest plugin one level below each of `dirs`.
///
/// Unreadable or invalid manifests are reported and skipped.
pub fn discover_manifests(dirs: &[PathBuf]) -> Vec<ManifestPlugin> {
    let mut plugins = Vec::new();

    for dir in dirs {
        let manifests = WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == MANIFEST_FILE);

        for entry in manifests {
            let Some(plugin_dir) = entry.path().parent() else {
                continue;
            };
            match load_plugin_dir(plugin_dir) {
                Ok(Some(plugin)) => {
                    debug!("Found plugin manifest {}", entry.path().display());
                    plugins.push(plugin);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping plugin in {}: {}", plugin_dir.display(), e),
            }
        }
    }

    plugins
}
