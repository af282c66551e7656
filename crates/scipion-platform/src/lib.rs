//! Host probing for the Scipion installer.
//!
//! Everything here asks the machine a question: is a program on `PATH`,
//! can a native library be found, where does the Python interpreter keep
//! its packages, which CUDA folders should be put in front of the search
//! paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Python interpreter '{0}' not found")]
    PythonNotFound(String),
    #[error("Failed to execute {program}: {source}")]
    ExecutionError {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to query site-packages from {python}: {message}")]
    SitePackages { python: String, message: String },
}

/// Information about the current platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Operating system (macos, linux, windows)
    pub os: String,
    /// CPU architecture (aarch64, x86_64)
    pub arch: String,
}

impl PlatformInfo {
    /// Detect the current platform.
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Extension of shared libraries built by `make install`.
    pub fn lib_suffix(&self) -> &'static str {
        if self.os == "linux" {
            "so"
        } else {
            "dylib"
        }
    }
}

/// Is `prog` reachable through `PATH`?
pub fn program_in_path(prog: &str) -> bool {
    which::which(prog).is_ok()
}

/// See if the native library `lib` is available.
///
/// `pkg-config --cflags --libs <lib>` is tried first, then `<lib>-config --cflags`.
pub fn check_lib(lib: &str) -> bool {
    if run_quiet("pkg-config", &["--cflags", "--libs", lib]) {
        return true;
    }
    run_quiet(&format!("{}-config", lib), &["--cflags"])
}

fn run_quiet(program: &str, args: &[&str]) -> bool {
    match Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("{} not runnable: {}", program, e);
            false
        }
    }
}

/// The Python interpreter driving pip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonInterpreter {
    /// Interpreter command, as given in the configuration
    pub executable: String,
    /// Folder where pure-Python distributions are installed
    pub site_packages: PathBuf,
}

impl PythonInterpreter {
    /// Use a known site-packages folder without asking the interpreter.
    pub fn new(executable: impl Into<String>, site_packages: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            site_packages: site_packages.into(),
        }
    }

    /// Ask `python` for its `purelib` folder.
    pub fn detect(python: &str) -> Result<Self, PlatformError> {
        if !program_in_path(python) && !Path::new(python).is_file() {
            return Err(PlatformError::PythonNotFound(python.to_string()));
        }

        let output = Command::new(python)
            .arg("-c")
            .arg("import sysconfig; print(sysconfig.get_paths()['purelib'])")
            .output()
            .map_err(|source| PlatformError::ExecutionError {
                program: python.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(PlatformError::SitePackages {
                python: python.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let purelib = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if purelib.is_empty() {
            return Err(PlatformError::SitePackages {
                python: python.to_string(),
                message: "empty purelib path".to_string(),
            });
        }

        debug!("site-packages for {}: {}", python, purelib);
        Ok(Self::new(python, purelib))
    }
}

/// Environment overlay for packages built against CUDA.
///
/// `<PACKAGE>_CUDA_LIB` / `<PACKAGE>_CUDA_BIN` take precedence; when the
/// package specific library folder is unset both folders fall back to the
/// configured defaults. Folders are only prepended when they exist.
pub fn cuda_environ(package: &str, default_lib: &Path, default_bin: &Path) -> BTreeMap<String, String> {
    cuda_environ_with(package, default_lib, default_bin, |key| std::env::var(key).ok())
}

/// [`cuda_environ`] with an explicit environment lookup.
pub fn cuda_environ_with<F>(
    package: &str,
    default_lib: &Path,
    default_bin: &Path,
    env: F,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let upper = package.to_uppercase();
    let (cuda_lib, cuda_bin) = match env(&format!("{}_CUDA_LIB", upper)) {
        Some(lib) => (PathBuf::from(lib), env(&format!("{}_CUDA_BIN", upper)).map(PathBuf::from)),
        None => (default_lib.to_path_buf(), Some(default_bin.to_path_buf())),
    };

    let mut overlay = BTreeMap::new();

    if cuda_lib.exists() {
        overlay.insert(
            "LD_LIBRARY_PATH".to_string(),
            prepend_path(&cuda_lib, env("LD_LIBRARY_PATH")),
        );
    }
    if let Some(bin) = cuda_bin.filter(|b| b.exists()) {
        overlay.insert("PATH".to_string(), prepend_path(&bin, env("PATH")));
    }

    overlay
}

fn prepend_path(dir: &Path, current: Option<String>) -> String {
    format!("{}:{}", dir.display(), current.unwrap_or_default())
}
