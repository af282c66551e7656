//! Release compatibility with the running core.

use crate::ReleaseFile;
use regex::Regex;
use scipion_types::{compare_releases, ReleaseVersion, DEVEL_VERSION, NULL_VERSION};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

static CORE_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"scipion-([\d.]*\d)").unwrap());

/// Core versions a release comment declares support for.
pub fn declared_core_versions(comment: &str) -> Vec<String> {
    CORE_ANNOTATION
        .captures_iter(comment)
        .map(|c| c[1].to_string())
        .collect()
}

fn same_version(a: &str, b: &str) -> bool {
    match (ReleaseVersion::parse(a), ReleaseVersion::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Releases of a plugin usable with the running core, plus the greatest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibleReleases {
    releases: BTreeMap<String, ReleaseFile>,
    latest: String,
}

impl Default for CompatibleReleases {
    fn default() -> Self {
        Self::none()
    }
}

impl CompatibleReleases {
    /// No compatible release; `latest` is [`NULL_VERSION`].
    pub fn none() -> Self {
        Self {
            releases: BTreeMap::new(),
            latest: NULL_VERSION.to_string(),
        }
    }

    /// The single pseudo release of a source (devel) install.
    pub fn devel() -> Self {
        let mut releases = BTreeMap::new();
        releases.insert(
            DEVEL_VERSION.to_string(),
            ReleaseFile {
                comment_text: None,
                upload_time: Some("   devel_mode".to_string()),
            },
        );
        Self {
            releases,
            latest: DEVEL_VERSION.to_string(),
        }
    }

    pub fn latest(&self) -> &str {
        &self.latest
    }

    pub fn contains(&self, version: &str) -> bool {
        self.releases.contains_key(version)
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn release(&self, version: &str) -> Option<&ReleaseFile> {
        self.releases.get(version)
    }

    /// Versions in release order, oldest first.
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.releases.keys().map(String::as_str).collect();
        versions.sort_by(|a, b| compare_releases(a, b));
        versions
    }
}

/// Keep the releases whose first file declares `core_version`.
///
/// Releases without any annotation are reported and skipped.
pub fn compatible_releases(
    project: &str,
    releases: &BTreeMap<String, Vec<ReleaseFile>>,
    core_version: &str,
) -> CompatibleReleases {
    let mut compatible = CompatibleReleases::none();

    for (release, files) in releases {
        let file = files.first().cloned().unwrap_or_default();
        let declared = declared_core_versions(file.comment_text.as_deref().unwrap_or(""));

        if declared.is_empty() {
            warn!(
                "{}'s release {} did not specify a compatible Scipion version. \
                 Please, remove this release from pypi",
                project, release
            );
            continue;
        }

        if declared.iter().any(|v| same_version(v, core_version)) {
            if compare_releases(&compatible.latest, release).is_lt() {
                compatible.latest = release.clone();
            }
            compatible.releases.insert(release.clone(), file);
        }
    }

    compatible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn releases(list: &[(&str, &str)]) -> BTreeMap<String, Vec<ReleaseFile>> {
        list.iter()
            .map(|(v, comment)| (v.to_string(), vec![ReleaseFile::with_comment(comment, "2021-01-01")]))
            .collect()
    }

    #[test]
    fn test_compatible_release_filtering() {
        let raw = releases(&[
            ("1.0", "scipion-3.0"),
            ("1.1", "no-annotation"),
            ("1.2", "scipion-3.0"),
        ]);
        let compat = compatible_releases("scipion-em-tool", &raw, "3.0");

        assert_eq!(compat.versions(), vec!["1.0", "1.2"]);
        assert_eq!(compat.latest(), "1.2");
        assert!(!compat.contains("1.1"));
    }

    #[test]
    fn test_other_core_versions_excluded() {
        let raw = releases(&[
            ("2.0", "scipion-2.0"),
            ("3.0.1", "scipion-3.0 scipion-3.1"),
            ("3.0.10", "scipion-3.0.0"),
        ]);
        let compat = compatible_releases("scipion-em-tool", &raw, "3.0");

        assert_eq!(compat.versions(), vec!["3.0.1", "3.0.10"]);
        assert_eq!(compat.latest(), "3.0.10");
    }

    #[test]
    fn test_nothing_compatible() {
        let mut raw = releases(&[("1.0", "scipion-2.0")]);
        raw.insert("0.9".to_string(), Vec::new());
        let compat = compatible_releases("scipion-em-old", &raw, "3.0");

        assert!(compat.is_empty());
        assert_eq!(compat.latest(), NULL_VERSION);
    }

    #[test]
    fn test_declared_core_versions() {
        assert_eq!(declared_core_versions("scipion-3.0, scipion-3.1."), vec!["3.0", "3.1"]);
        assert!(declared_core_versions("compatible with everything").is_empty());
    }

    #[test]
    fn test_devel_releases() {
        let devel = CompatibleReleases::devel();
        assert_eq!(devel.latest(), DEVEL_VERSION);
        assert_eq!(
            devel.release(DEVEL_VERSION).and_then(|r| r.upload_time.as_deref()),
            Some("   devel_mode")
        );
    }
}
