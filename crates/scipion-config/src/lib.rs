//! Configuration for the Scipion installer.
//!
//! Values are resolved in three layers: built-in defaults, an optional
//! `scipion.toml` file, and environment variables. The resolved [`Config`]
//! is built once per process and handed to whoever needs it.

use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default location of the plugin catalog.
pub const DEFAULT_PLUGIN_REPOSITORY: &str = "http://scipion.i2pc.es/getplugins/";

/// Default package index JSON API.
pub const DEFAULT_PYPI_URL: &str = "https://pypi.python.org/pypi";

/// Default server holding software tarballs.
pub const DEFAULT_URL_SOFTWARE: &str = "http://scipion.cnb.csic.es/downloads/scipion/software";

/// Core version plugins declare compatibility with.
pub const DEFAULT_CORE_VERSION: &str = "3.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Raw file layer. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    software_dir: Option<PathBuf>,
    em_root: Option<PathBuf>,
    url_software: Option<String>,
    plugin_repository: Option<String>,
    pypi_url: Option<String>,
    core_version: Option<String>,
    python: Option<String>,
    site_packages: Option<PathBuf>,
    #[serde(default)]
    plugin_dirs: Vec<PathBuf>,
    cuda_lib: Option<PathBuf>,
    cuda_bin: Option<PathBuf>,
    install_binaries: Option<bool>,
}

/// Resolved installer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the software tree (`lib`, `bin`, `tmp`, `log`, ...)
    pub software_dir: PathBuf,
    /// Shared binaries folder holding versioned package folders and links
    pub em_root: PathBuf,
    /// Server with the default tarballs
    pub url_software: String,
    /// Plugin catalog location, a URL or a local JSON file
    pub plugin_repository: String,
    /// Package index JSON API base
    pub pypi_url: String,
    /// Core version used for release compatibility
    pub core_version: String,
    /// Python interpreter running pip
    pub python: String,
    /// Explicit site-packages folder; detected from `python` when unset
    pub site_packages: Option<PathBuf>,
    /// Extra folders scanned for plugin binary manifests
    pub plugin_dirs: Vec<PathBuf>,
    /// Default CUDA library folder
    pub cuda_lib: PathBuf,
    /// Default CUDA binaries folder
    pub cuda_bin: PathBuf,
    /// Whether plugin binaries are installed along with the plugin
    pub install_binaries: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(RawConfig::default(), |_| None)
    }
}

impl Config {
    /// Load the configuration from the default (or given) file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("SCIPION_CONFIG").map(PathBuf::from))
            .or_else(default_config_file);

        let raw = match file {
            Some(ref file) if file.exists() => read_raw(file)?,
            Some(ref file) => {
                debug!("No config file at {}, using defaults", file.display());
                RawConfig::default()
            }
            None => RawConfig::default(),
        };

        Ok(Self::resolve(raw, |key| std::env::var(key).ok()))
    }

    /// Load from a TOML string with a custom environment lookup.
    pub fn from_toml_str<F>(content: &str, env: F) -> Result<Self, toml::de::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content)?;
        Ok(Self::resolve(raw, env))
    }

    fn resolve<F>(raw: RawConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let software_dir = env("SCIPION_SOFTWARE")
            .map(PathBuf::from)
            .or(raw.software_dir)
            .unwrap_or_else(default_software_dir);

        let em_root = env("EM_ROOT")
            .map(PathBuf::from)
            .or(raw.em_root)
            .unwrap_or_else(|| software_dir.join("em"));

        let plugin_repository = env("SCIPION_PLUGIN_JSON")
            .or_else(|| env("SCIPION_PLUGIN_REPO_URL"))
            .or(raw.plugin_repository)
            .unwrap_or_else(|| DEFAULT_PLUGIN_REPOSITORY.to_string());

        let plugin_dirs = match env("SCIPION_PLUGIN_DIRS") {
            Some(dirs) => std::env::split_paths(&dirs).collect(),
            None => raw.plugin_dirs,
        };

        // Any value disables binaries, even "0" or "false".
        let install_binaries = if env("SCIPION_DONT_INSTALL_BINARIES").is_some() {
            false
        } else {
            raw.install_binaries.unwrap_or(true)
        };

        Self {
            em_root,
            url_software: env("SCIPION_URL_SOFTWARE")
                .or(raw.url_software)
                .unwrap_or_else(|| DEFAULT_URL_SOFTWARE.to_string()),
            plugin_repository,
            pypi_url: env("SCIPION_PYPI_URL")
                .or(raw.pypi_url)
                .unwrap_or_else(|| DEFAULT_PYPI_URL.to_string()),
            core_version: env("SCIPION_CORE_VERSION")
                .or(raw.core_version)
                .unwrap_or_else(|| DEFAULT_CORE_VERSION.to_string()),
            python: env("SCIPION_PYTHON")
                .or(raw.python)
                .unwrap_or_else(|| "python3".to_string()),
            site_packages: env("SCIPION_SITE_PACKAGES")
                .map(PathBuf::from)
                .or(raw.site_packages),
            plugin_dirs,
            cuda_lib: env("CUDA_LIB")
                .map(PathBuf::from)
                .or(raw.cuda_lib)
                .unwrap_or_else(|| PathBuf::from("/usr/local/cuda/lib64")),
            cuda_bin: env("CUDA_BIN")
                .map(PathBuf::from)
                .or(raw.cuda_bin)
                .unwrap_or_else(|| PathBuf::from("/usr/local/cuda/bin")),
            install_binaries,
            software_dir,
        }
    }
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded config from {}", path.display());
    toml::from_str(&content).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("es", "i2pc", "scipion")
}

/// Default config file location (`<config dir>/scipion.toml`).
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("scipion.toml"))
}

fn default_software_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("software"))
        .unwrap_or_else(|| PathBuf::from("software"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("", env_of(&[])).unwrap();
        assert_eq!(config.em_root, config.software_dir.join("em"));
        assert_eq!(config.plugin_repository, DEFAULT_PLUGIN_REPOSITORY);
        assert_eq!(config.core_version, "3.0");
        assert!(config.install_binaries);
        assert!(config.site_packages.is_none());
    }

    #[test]
    fn test_file_layer() {
        let toml = r#"
software_dir = "/opt/scipion/software"
core_version = "3.3"
plugin_dirs = ["/opt/plugins"]
install_binaries = false
"#;
        let config = Config::from_toml_str(toml, env_of(&[])).unwrap();
        assert_eq!(config.software_dir, PathBuf::from("/opt/scipion/software"));
        assert_eq!(config.em_root, PathBuf::from("/opt/scipion/software/em"));
        assert_eq!(config.core_version, "3.3");
        assert_eq!(config.plugin_dirs, vec![PathBuf::from("/opt/plugins")]);
        assert!(!config.install_binaries);
    }

    #[test]
    fn test_env_overrides_file() {
        let toml = r#"
software_dir = "/opt/scipion/software"
plugin_repository = "https://example.org/plugins.json"
"#;
        let env = env_of(&[
            ("SCIPION_SOFTWARE", "/data/software"),
            ("EM_ROOT", "/data/em"),
            ("SCIPION_PLUGIN_REPO_URL", "https://mirror.example.org/plugins"),
            ("SCIPION_DONT_INSTALL_BINARIES", "0"),
        ]);
        let config = Config::from_toml_str(toml, env).unwrap();
        assert_eq!(config.software_dir, PathBuf::from("/data/software"));
        assert_eq!(config.em_root, PathBuf::from("/data/em"));
        assert_eq!(config.plugin_repository, "https://mirror.example.org/plugins");
        assert!(!config.install_binaries);
    }

    #[test]
    fn test_plugin_json_wins_over_repo_url() {
        let env = env_of(&[
            ("SCIPION_PLUGIN_JSON", "/etc/scipion/plugins.json"),
            ("SCIPION_PLUGIN_REPO_URL", "https://mirror.example.org/plugins"),
        ]);
        let config = Config::from_toml_str("", env).unwrap();
        assert_eq!(config.plugin_repository, "/etc/scipion/plugins.json");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml_str("sofware_dir = \"/x\"", env_of(&[])).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(!config.python.is_empty());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scipion.toml");
        fs::write(&path, "core_version = [").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
