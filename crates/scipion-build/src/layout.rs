//! On-disk layout of an installation.

use std::fs;
use std::path::{Path, PathBuf};

/// Folders an [`Environment`](crate::Environment) installs into.
///
/// ```text
/// <software>/
///   bin/ include/ lib/ log/ tmp/
///   em/            (may live elsewhere, see `em_root`)
///     relion-3.0/
///     relion -> relion-3.0
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    software: PathBuf,
    em_root: PathBuf,
    site_packages: PathBuf,
    url_software: String,
}

impl Layout {
    pub fn new(
        software: impl Into<PathBuf>,
        em_root: impl Into<PathBuf>,
        site_packages: impl Into<PathBuf>,
        url_software: impl Into<String>,
    ) -> Self {
        Self {
            software: software.into(),
            em_root: em_root.into(),
            site_packages: site_packages.into(),
            url_software: url_software.into(),
        }
    }

    /// Layout rooted at `root`, with `em` and `site-packages` inside it.
    pub fn rooted_at(root: &Path) -> Self {
        Self::new(
            root.join("software"),
            root.join("software").join("em"),
            root.join("site-packages"),
            "http://localhost/software",
        )
    }

    pub fn software(&self) -> &Path {
        &self.software
    }

    pub fn lib_folder(&self) -> PathBuf {
        self.software.join("lib")
    }

    /// `<software>/lib/lib<name>.<suffix>`
    pub fn lib(&self, name: &str, suffix: &str) -> PathBuf {
        self.lib_folder().join(format!("lib{}.{}", name, suffix))
    }

    pub fn include_folder(&self) -> PathBuf {
        self.software.join("include")
    }

    pub fn bin_folder(&self) -> PathBuf {
        self.software.join("bin")
    }

    pub fn tmp_folder(&self) -> PathBuf {
        self.software.join("tmp")
    }

    pub fn log_folder(&self) -> PathBuf {
        self.software.join("log")
    }

    pub fn log(&self, file: &str) -> PathBuf {
        self.log_folder().join(file)
    }

    pub fn em_folder(&self) -> &Path {
        &self.em_root
    }

    /// `<em_root>/<name>`
    pub fn em(&self, name: &str) -> PathBuf {
        self.em_root.join(name)
    }

    pub fn site_packages(&self) -> &Path {
        &self.site_packages
    }

    pub fn url_software(&self) -> &str {
        &self.url_software
    }

    /// Create the folders commands write into.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.bin_folder(),
            self.tmp_folder(),
            self.log_folder(),
            self.em_root.clone(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
