//! Installed pip distributions.
//!
//! Only the metadata pip leaves behind is read: `<name>-<version>.dist-info/METADATA`
//! for wheels, `<name>.egg-info/PKG-INFO` for develop installs, and the
//! `top_level.txt` naming the importable package folder.

use scipion_types::normalize_dist_name;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const METADATA_KEYS: [&str; 6] = ["Name", "Version", "Summary", "Home-page", "Author", "Author-email"];

/// A site-packages folder.
#[derive(Debug, Clone)]
pub struct SitePackages {
    root: PathBuf,
}

impl SitePackages {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The installed distribution called `pip_name`, compared the way pip does.
    pub fn find(&self, pip_name: &str) -> Option<Distribution> {
        if pip_name.is_empty() {
            return None;
        }
        let wanted = normalize_dist_name(pip_name);
        let entries = fs::read_dir(&self.root).ok()?;

        entries.flatten().find_map(|entry| {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let stem = file_name
                .strip_suffix(".dist-info")
                .or_else(|| file_name.strip_suffix(".egg-info"))?;
            let name = stem.split('-').next()?;
            if normalize_dist_name(name) == wanted {
                Distribution::load(&entry.path())
            } else {
                None
            }
        })
    }

    pub fn is_installed(&self, pip_name: &str) -> bool {
        self.find(pip_name).is_some()
    }
}

/// Metadata of one installed distribution.
#[derive(Debug, Clone)]
pub struct Distribution {
    path: PathBuf,
    metadata: BTreeMap<String, String>,
}

impl Distribution {
    fn load(path: &Path) -> Option<Self> {
        let file = if path.is_dir() {
            let metadata = path.join("METADATA");
            if metadata.is_file() {
                metadata
            } else {
                path.join("PKG-INFO")
            }
        } else {
            path.to_path_buf()
        };
        let text = fs::read_to_string(file).ok()?;

        Some(Self {
            path: path.to_path_buf(),
            metadata: parse_metadata(&text),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn field(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.field("Name")
    }

    pub fn version(&self) -> &str {
        self.field("Version")
    }

    pub fn summary(&self) -> &str {
        self.field("Summary")
    }

    pub fn home_page(&self) -> &str {
        self.field("Home-page")
    }

    pub fn author(&self) -> &str {
        self.field("Author")
    }

    pub fn author_email(&self) -> &str {
        self.field("Author-email")
    }

    /// Importable package folder declared in `top_level.txt`.
    pub fn top_level(&self) -> Option<String> {
        let text = fs::read_to_string(self.path.join("top_level.txt")).ok()?;
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}

/// Header fields of a core metadata file; the first occurrence of a key wins.
fn parse_metadata(text: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(": ") {
            if METADATA_KEYS.contains(&key) && !metadata.contains_key(key) {
                metadata.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    metadata
}
