//! Declarative plugin binaries (`binaries.toml`).
//!
//! ```toml
//! [[library]]
//! name = "fftw3"
//! tar = "fftw-3.3.4.tgz"
//! flags = ["--enable-threads", "--enable-shared"]
//!
//! [[package]]
//! name = "gctf"
//! version = "1.06"
//! tar = "void.tgz"
//! commands = [{ cmd = "wget https://example.org/Gctf_v1.06.tar.gz && tar -xf Gctf_v1.06.tar.gz", targets = ["bin/Gctf"] }]
//! default = true
//! ```
//!
//! Entries are registered libraries first, then pip modules, then packages;
//! within a kind they keep file order, so the last version of a package
//! listed is the one its bare name installs unless one is `preferred`.
//! Library outputs are relative to the software folder.

use crate::{Plugin, PluginError};
use scipion_build::{
    DownloadOptions, Environment, LibraryOptions, PackageOptions, PipModuleOptions,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinariesManifest {
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibrarySpec>,
    #[serde(default, rename = "pip_module")]
    pub pip_modules: Vec<PipModuleSpec>,
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub cmd: String,
    #[serde(default)]
    pub targets: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadSpec {
    pub tar: Option<String>,
    pub url: Option<String>,
    pub url_suffix: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub build_dir: Option<String>,
    pub target_dir: Option<String>,
    #[serde(default)]
    pub create_build_dir: bool,
    pub target: Option<String>,
}

impl From<DownloadSpec> for DownloadOptions {
    fn from(spec: DownloadSpec) -> Self {
        DownloadOptions {
            tar: spec.tar,
            url: spec.url,
            url_suffix: spec.url_suffix,
            download_dir: spec.download_dir,
            build_dir: spec.build_dir,
            target_dir: spec.target_dir,
            create_build_dir: spec.create_build_dir,
            target: spec.target,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibrarySpec {
    pub name: String,
    #[serde(default = "yes")]
    pub default: bool,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(flatten)]
    pub download: DownloadSpec,
    pub config_target: Option<String>,
    #[serde(default)]
    pub config_always: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    pub targets: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub cmake: bool,
    #[serde(default)]
    pub needed_progs: Vec<String>,
    #[serde(default)]
    pub lib_checks: Vec<String>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    pub config_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipModuleSpec {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub pip_cmd: Option<String>,
    pub target: Option<String>,
    #[serde(default = "yes")]
    pub default: bool,
    #[serde(default)]
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: Option<String>,
    #[serde(flatten)]
    pub download: DownloadSpec,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub needed_progs: Vec<String>,
    #[serde(default)]
    pub lib_checks: Vec<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub update_cuda: bool,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub preferred: bool,
}

fn command_pairs(commands: &[CommandSpec], base: Option<&Path>) -> Vec<(String, Vec<PathBuf>)> {
    commands
        .iter()
        .map(|c| {
            let targets = c
                .targets
                .iter()
                .map(|t| base.map_or_else(|| t.clone(), |b| b.join(t)))
                .collect();
            (c.cmd.clone(), targets)
        })
        .collect()
}

impl LibrarySpec {
    fn options(&self, software: &Path) -> LibraryOptions {
        let defaults = LibraryOptions::default();
        LibraryOptions {
            default: self.default,
            deps: self.deps.clone(),
            download: self.download.clone().into(),
            config_target: self.config_target.clone().unwrap_or(defaults.config_target),
            config_always: self.config_always,
            flags: self.flags.clone(),
            targets: self
                .targets
                .as_ref()
                .map(|ts| ts.iter().map(|t| software.join(t)).collect()),
            clean: self.clean,
            cmake: self.cmake,
            needed_progs: self.needed_progs.clone(),
            lib_checks: self.lib_checks.clone(),
            commands: command_pairs(&self.commands, Some(software)),
            config_dir: self.config_dir.clone(),
        }
    }
}

impl PipModuleSpec {
    fn options(&self) -> PipModuleOptions {
        PipModuleOptions {
            version: self.version.clone(),
            pip_cmd: self.pip_cmd.clone(),
            target: self.target.clone(),
            default: self.default,
            deps: self.deps.clone(),
        }
    }
}

impl PackageSpec {
    fn options(&self) -> PackageOptions {
        PackageOptions {
            version: self.version.clone(),
            commands: command_pairs(&self.commands, None),
            needed_progs: self.needed_progs.clone(),
            lib_checks: self.lib_checks.clone(),
            deps: self.deps.clone(),
            default: self.default,
            update_cuda: self.update_cuda,
            vars: self.vars.clone(),
            preferred: self.preferred,
            download: self.download.clone().into(),
        }
    }
}

/// A plugin whose binaries come from a `binaries.toml` file.
#[derive(Debug, Clone)]
pub struct ManifestPlugin {
    name: String,
    path: PathBuf,
    manifest: BinariesManifest,
}

impl ManifestPlugin {
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self, PluginError> {
        let text = fs::read_to_string(path).map_err(|source| PluginError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(name, path, &text)
    }

    pub fn parse(name: impl Into<String>, path: &Path, text: &str) -> Result<Self, PluginError> {
        let manifest = toml::from_str(text).map_err(|source| PluginError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &BinariesManifest {
        &self.manifest
    }
}

impl Plugin for ManifestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn define_binaries(&self, env: &mut Environment) -> Result<(), PluginError> {
        let software = env.layout().software().to_path_buf();
        for lib in &self.manifest.libraries {
            env.add_library(&lib.name, lib.options(&software))?;
        }
        for module in &self.manifest.pip_modules {
            env.add_pip_module(&module.name, module.options())?;
        }
        for package in &self.manifest.packages {
            env.add_package(&package.name, package.options())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scipion_build::{EnvOptions, Layout};

    const MANIFEST: &str = r#"
[[library]]
name = "fftw3"
tar = "fftw-3.3.4.tgz"
flags = ["--enable-threads"]
targets = ["lib/libfftw3.so"]
default = false

[[pip_module]]
name = "numpy"
version = "1.24.0"
default = false

[[package]]
name = "gctf"
version = "1.06"
tar = "void.tgz"
commands = [{ cmd = "touch bin/Gctf", targets = ["bin/Gctf"] }]
deps = ["fftw3"]

[[package]]
name = "gctf"
version = "1.18"
tar = "void.tgz"
vars = { GCTF_HOME = "/opt/gctf" }
"#;

    #[test]
    fn test_define_binaries_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = ManifestPlugin::parse("gctf", Path::new("binaries.toml"), MANIFEST).unwrap();
        let mut env = Environment::new(Layout::rooted_at(dir.path()), EnvOptions::default());
        plugin.define_binaries(&mut env).unwrap();

        let names: Vec<&str> = env.targets().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["fftw3", "numpy", "gctf-1.06", "gctf-1.18"]);
        assert_eq!(env.target("gctf").unwrap().name(), "gctf-1.18");
        assert_eq!(env.target("gctf-1.06").unwrap().deps(), &["fftw3".to_string()]);

        let make_install = env.target("fftw3").unwrap().final_commands().next().unwrap();
        assert_eq!(
            make_install.targets(),
            &[env.layout().software().join("lib/libfftw3.so")]
        );

        let user_cmd = &env.target("gctf-1.06").unwrap().commands()[2];
        assert_eq!(
            user_cmd.targets(),
            &[env.layout().em("gctf-1.06").join("bin/Gctf")]
        );
        let link = &env.target("gctf-1.18").unwrap().commands()[2];
        assert_eq!(link.step().to_string(), "Link 'gctf-1.18 -> gctf-1.18'");
    }

    #[test]
    fn test_unknown_section_rejected() {
        let err = ManifestPlugin::parse("bad", Path::new("binaries.toml"), "[[binary]]\nname = \"x\"\n")
            .unwrap_err();
        assert!(matches!(err, PluginError::Manifest { .. }));
    }

    #[test]
    fn test_unknown_dependency_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[[package]]\nname = \"tool\"\nversion = \"1.0\"\ndeps = [\"missing\"]\n";
        let plugin = ManifestPlugin::parse("tool", Path::new("binaries.toml"), text).unwrap();
        let mut env = Environment::new(Layout::rooted_at(dir.path()), EnvOptions::default());

        let err = plugin.define_binaries(&mut env).unwrap_err();
        assert!(matches!(err, PluginError::Build(_)));
    }
}
