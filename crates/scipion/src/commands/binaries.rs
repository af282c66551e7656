//! `installb`, `uninstallb` and `listb`: binaries addressed by name.

use super::{diagnose, ui, EngineFlags};
use crate::session::Session;
use miette::Result;
use scipion_plugin::{all_binaries, bin_to_plugin, InstallContext, PluginInfo};
use std::collections::BTreeMap;

/// Plugin info of the plugin declaring `bin`, reporting unknown names.
fn owner_of(bin: &str, owners: &BTreeMap<String, String>, ctx: &InstallContext) -> Option<PluginInfo> {
    let Some(plugin_name) = owners.get(bin) else {
        ui::error(format!("ERROR: Could not find target {}", bin));
        return None;
    };
    let plugin = ctx.resolve_plugin(plugin_name)?;
    Some(PluginInfo::for_plugin(plugin_name, plugin, ctx))
}

/// Install each binary with the plugin that declares it.
pub fn install_bins(session: &Session, bins: &[String], flags: &EngineFlags) -> Result<bool> {
    if bins.is_empty() {
        return Ok(list_bins(session));
    }

    let ctx = session.context(flags);
    let owners = bin_to_plugin(&ctx);

    let mut ok = true;
    for bin in bins {
        let Some(info) = owner_of(bin, &owners, &ctx) else {
            ok = false;
            continue;
        };
        let mut options = ctx.default_options();
        options.targets = vec![bin.clone()];
        info.install_bin(&ctx, options).map_err(diagnose)?;
    }
    Ok(ok)
}

/// Remove each binary folder and its unversioned link.
pub fn uninstall_bins(session: &Session, bins: &[String]) -> Result<bool> {
    let ctx = &session.ctx;
    let owners = bin_to_plugin(ctx);

    let mut ok = true;
    for bin in bins {
        let Some(info) = owner_of(bin, &owners, ctx) else {
            ok = false;
            continue;
        };
        info.uninstall_bins(ctx, Some(std::slice::from_ref(bin))).map_err(diagnose)?;
    }
    Ok(ok)
}

/// Print every binary the known plugins declare.
pub fn list_bins(session: &Session) -> bool {
    let env = all_binaries(&session.ctx);
    let help = env.render_help();
    if help.is_empty() {
        ui::warn("No plugin defines binaries");
    } else {
        print!("{}", help);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use scipion_config::Config;
    use std::fs;
    use std::path::Path;

    fn session(root: &Path) -> Session {
        let site = root.join("site-packages");
        fs::create_dir_all(site.join("gctf")).unwrap();
        fs::write(
            site.join("gctf").join("binaries.toml"),
            "[[package]]\nname = \"gctf\"\nversion = \"1.18\"\ntar = \"void.tgz\"\n",
        )
        .unwrap();
        let toml = format!(
            "software_dir = \"{}\"\nsite_packages = \"{}\"\n",
            root.join("software").display(),
            site.display()
        );
        Session::from_config(Config::from_toml_str(&toml, |_| None).unwrap()).unwrap()
    }

    #[test]
    fn test_unknown_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let flags = EngineFlags {
            jobs: 1,
            show: true,
            show_tree: false,
            dot: false,
        };

        assert!(!install_bins(&session, &["ghost-1.0".to_string()], &flags).unwrap());
        assert!(!uninstall_bins(&session, &["ghost".to_string()]).unwrap());
        assert!(list_bins(&session));
    }

    #[test]
    fn test_uninstall_binary() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let installed = session.ctx.layout.em("gctf-1.18");
        fs::create_dir_all(&installed).unwrap();

        assert!(uninstall_bins(&session, &["gctf-1.18".to_string()]).unwrap());
        assert!(!installed.exists());

        // Known but not installed: reported, not an error
        assert!(uninstall_bins(&session, &["gctf".to_string()]).unwrap());
    }
}
