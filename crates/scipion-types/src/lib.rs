//! Core types shared by the Scipion installer crates.
//!
//! This crate defines the version model used to compare plugin releases,
//! the sentinel release values, binary naming helpers and the possible
//! sources a plugin distribution can be installed from.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Release value meaning "no release is compatible with this core version".
///
/// It must never be installed.
pub const NULL_VERSION: &str = "0.0.0";

/// Release value used for plugins installed from a source tree or a git URL.
///
/// It compares greater than any published release.
pub const DEVEL_VERSION: &str = "999.9.9";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,
    #[error("Invalid version '{0}'")]
    Invalid(String),
}

/// A release version as published on the package index.
///
/// Python releases are not semver: they may have two or four numeric
/// components (`3.0`, `1.2.0.1`) and suffixes such as `b1` or `.dev0`.
/// Numeric components are compared with implicit trailing zeros, so
/// `3.0 == 3.0.0`. A version with a suffix sorts before the plain release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseVersion {
    release: Vec<u64>,
    suffix: Option<String>,
}

impl ReleaseVersion {
    /// Parse a release string.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (numbers, rest) = s.split_at(split);
        let numbers = numbers.trim_end_matches('.');

        if numbers.is_empty() {
            return Err(VersionError::Invalid(s.to_string()));
        }

        let release = numbers
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| VersionError::Invalid(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let suffix = rest.trim_start_matches(['.', '-', '_']);
        let suffix = if suffix.is_empty() {
            None
        } else {
            Some(suffix.to_lowercase())
        };

        Ok(Self { release, suffix })
    }

    /// Numeric release components.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Whether this version carries a pre/dev/post suffix.
    pub fn is_prerelease(&self) -> bool {
        self.suffix.is_some()
    }

    fn component(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }
}

impl FromStr for ReleaseVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReleaseVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReleaseVersion> for String {
    fn from(value: ReleaseVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self.release.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", numbers.join("."))?;
        if let Some(suffix) = &self.suffix {
            write!(f, "{}", suffix)?;
        }
        Ok(())
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for idx in 0..len {
            match self.component(idx).cmp(&other.component(idx)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        match (&self.suffix, &other.suffix) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

/// Compare two release strings, treating unparsable ones as the lowest.
pub fn compare_releases(a: &str, b: &str) -> Ordering {
    match (ReleaseVersion::parse(a), ReleaseVersion::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Folder/target name of a versioned package, e.g. `ctffind-4.1.14`.
pub fn ext_name(name: &str, version: &str) -> String {
    format!("{}-{}", name, version)
}

/// Split a binary target name on its first dash.
///
/// `relion-3.0` gives `("relion", Some("3.0"))`; a name without a dash has
/// no version. Names such as `cuda-toolkit-11` keep only the first word, the
/// same split used to build the unversioned binary index.
pub fn split_bin_name(bin: &str) -> (&str, Option<&str>) {
    match bin.split_once('-') {
        Some((name, version)) => (name, Some(version)),
        None => (bin, None),
    }
}

/// Normalise a distribution name the way pip compares them (PEP 503).
pub fn normalize_dist_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.extend(c.to_lowercase());
            last_sep = false;
        }
    }
    out
}

/// Where a plugin distribution is installed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipSource {
    /// A pinned release from the package index
    Index { name: String, version: String },
    /// A local source tree, installed in editable mode
    Editable(PathBuf),
    /// A git repository URL, always re-installed
    Git(String),
}

impl PipSource {
    /// Arguments following `pip install`.
    pub fn install_args(&self) -> Vec<String> {
        match self {
            PipSource::Index { name, version } => vec![format!("{}=={}", name, version)],
            PipSource::Editable(path) => vec!["-e".to_string(), path.display().to_string()],
            PipSource::Git(url) => vec!["--upgrade".to_string(), format!("git+{}", url)],
        }
    }

    /// [`install_args`](Self::install_args) quoted for `sh -c`.
    pub fn shell_args(&self) -> Result<String, shlex::QuoteError> {
        let args = self.install_args();
        shlex::try_join(args.iter().map(String::as_str))
    }
}

impl fmt::Display for PipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.install_args().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_ordering() {
        let v = |s: &str| ReleaseVersion::parse(s).unwrap();

        assert_eq!(v("3.0"), v("3.0.0"));
        assert!(v("1.2") > v("1.1.9"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("3.0.0b1") < v("3.0.0"));
        assert!(v(DEVEL_VERSION) > v("12.4.1"));
        assert!(v(NULL_VERSION) < v("0.0.1"));
    }

    #[test]
    fn test_release_display_roundtrip() {
        assert_eq!(ReleaseVersion::parse("v1.2.3").unwrap().to_string(), "1.2.3");
        assert_eq!(ReleaseVersion::parse("3.0.0.dev1").unwrap().to_string(), "3.0.0dev1");
        assert!(ReleaseVersion::parse("").is_err());
        assert!(ReleaseVersion::parse("abc").is_err());
    }

    #[test]
    fn test_compare_releases_with_garbage() {
        assert_eq!(compare_releases("1.0", "latest"), Ordering::Greater);
        assert_eq!(compare_releases("2.0", "10.0"), Ordering::Less);
    }

    #[test]
    fn test_split_bin_name() {
        assert_eq!(split_bin_name("relion-3.0"), ("relion", Some("3.0")));
        assert_eq!(split_bin_name("ctffind"), ("ctffind", None));
        assert_eq!(split_bin_name("cuda-toolkit-11"), ("cuda", Some("toolkit-11")));
        assert_eq!(ext_name("gctf", "1.06"), "gctf-1.06");
    }

    #[test]
    fn test_normalize_dist_name() {
        assert_eq!(normalize_dist_name("Scipion_EM.Relion"), "scipion-em-relion");
        assert_eq!(normalize_dist_name("scipion--em"), "scipion-em");
    }

    #[test]
    fn test_pip_source_args() {
        let src = PipSource::Index {
            name: "scipion-em-relion".to_string(),
            version: "3.1.0".to_string(),
        };
        assert_eq!(src.to_string(), "scipion-em-relion==3.1.0");

        let git = PipSource::Git("https://github.com/scipion-em/scipion-em-xmipp.git".to_string());
        assert_eq!(
            git.install_args(),
            vec!["--upgrade", "git+https://github.com/scipion-em/scipion-em-xmipp.git"]
        );
    }

    #[test]
    fn test_editable_path_with_spaces_is_one_word() {
        let src = PipSource::Editable(PathBuf::from("/home/me/my plugins/scipion-em-relion; rm -rf x"));
        let line = src.shell_args().unwrap();
        assert_eq!(
            shlex::split(&line).unwrap(),
            vec!["-e", "/home/me/my plugins/scipion-em-relion; rm -rf x"]
        );

        let nul = PipSource::Git("https://example.org/a\0b.git".to_string());
        assert!(nul.shell_args().is_err());
    }
}
