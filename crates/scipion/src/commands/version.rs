//! Version checks of the core distributions for `update`.

use futures::future::join_all;
use scipion_plugin::SitePackages;
use scipion_registry::{ProjectIndex, RegistryError};
use scipion_types::compare_releases;
use std::cmp::Ordering;

/// Distributions making up the Scipion core, in install order.
pub const CORE_PACKAGES: [&str; 3] = ["scipion-pyworkflow", "scipion-em", "scipion-app"];

/// A distribution with a newer release on the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedPackage {
    pub name: String,
    pub current: String,
    pub latest: String,
}

/// Compare the installed `name` with the index.
/// Returns None if up to date, not installed or unknown to the index.
pub async fn check_for_update<I: ProjectIndex>(
    index: &I,
    site: &SitePackages,
    name: &str,
) -> Result<Option<OutdatedPackage>, RegistryError> {
    let Some(dist) = site.find(name) else {
        return Ok(None);
    };
    let current = dist.version().to_string();

    let Some(project) = index.project(name).await? else {
        return Ok(None);
    };
    let Some(latest) = project.info.version.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if compare_releases(&latest, &current) == Ordering::Greater {
        Ok(Some(OutdatedPackage {
            name: name.to_string(),
            current,
            latest,
        }))
    } else {
        Ok(None)
    }
}

/// Check every name concurrently, logging the ones the index could not answer.
pub async fn check_all_for_updates<I: ProjectIndex>(
    index: &I,
    site: &SitePackages,
    names: &[&str],
) -> Vec<OutdatedPackage> {
    let checks = names.iter().map(|name| check_for_update(index, site, name));

    let mut outdated = Vec::new();
    for (name, result) in names.iter().zip(join_all(checks).await) {
        match result {
            Ok(Some(package)) => outdated.push(package),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to check {} for updates: {}", name, e),
        }
    }
    outdated
}

#[cfg(test)]
mod tests {
    use super::*;
    use scipion_registry::{MemoryIndex, ProjectInfo, PypiProject};
    use std::fs;
    use std::path::Path;

    fn write_dist(site: &Path, name: &str, version: &str) {
        let dir = site.join(format!("{}-{}.dist-info", name.replace('-', "_"), version));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("METADATA"),
            format!("Metadata-Version: 2.1\nName: {}\nVersion: {}\n", name, version),
        )
        .unwrap();
    }

    fn project(version: &str) -> PypiProject {
        PypiProject {
            info: ProjectInfo {
                version: Some(version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_check_for_update() {
        let dir = tempfile::tempdir().unwrap();
        write_dist(dir.path(), "scipion-em", "3.0.9");
        write_dist(dir.path(), "scipion-app", "3.0.12");
        let site = SitePackages::new(dir.path());

        let mut index = MemoryIndex::new();
        index
            .insert("scipion-em", project("3.0.10"))
            .insert("scipion-app", project("3.0.12"))
            .insert("scipion-pyworkflow", project("3.0.30"));

        let outdated = check_for_update(&index, &site, "scipion-em").await.unwrap();
        assert_eq!(
            outdated,
            Some(OutdatedPackage {
                name: "scipion-em".to_string(),
                current: "3.0.9".to_string(),
                latest: "3.0.10".to_string(),
            })
        );

        assert_eq!(check_for_update(&index, &site, "scipion-app").await.unwrap(), None);
        // Not installed locally
        assert_eq!(check_for_update(&index, &site, "scipion-pyworkflow").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_all_for_updates() {
        let dir = tempfile::tempdir().unwrap();
        for name in CORE_PACKAGES {
            write_dist(dir.path(), name, "3.0.0");
        }
        let site = SitePackages::new(dir.path());

        let mut index = MemoryIndex::new();
        index
            .insert("scipion-pyworkflow", project("3.1.0"))
            .insert("scipion-app", project("3.0.0"));

        let outdated = check_all_for_updates(&index, &site, &CORE_PACKAGES).await;
        let names: Vec<&str> = outdated.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["scipion-pyworkflow"]);
    }
}
