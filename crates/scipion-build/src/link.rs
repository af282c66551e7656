//! Links inside the shared binaries folder.
//!
//! Versioned package folders live side by side in `em_root`; an unversioned
//! link names the active version (`relion -> relion-3.1.0`).

use crate::BuildError;
use console::style;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Create `em_root/link_name` pointing at `folder_name`.
///
/// The link target is stored relative, so the whole folder can be moved.
/// `folder_name` must exist and an existing `link_name` must itself be a
/// link; it is replaced.
pub fn create_package_link(em_root: &Path, link_name: &str, folder_name: &str) -> Result<(), BuildError> {
    if link_name == folder_name {
        return Ok(());
    }

    let link_text = format!("'{} -> {}'", link_name, folder_name);
    let link = em_root.join(link_name);
    let folder = em_root.join(folder_name);

    if !folder.exists() {
        return Err(BuildError::Link {
            link: link_text,
            message: format!("'{}' does not exist", folder_name),
        });
    }

    if let Ok(meta) = fs::symlink_metadata(&link) {
        if meta.file_type().is_symlink() {
            fs::remove_file(&link)?;
        } else {
            return Err(BuildError::Link {
                link: link_text,
                message: format!("'{}' exists and is not a link", link_name),
            });
        }
    }

    symlink_dir(Path::new(folder_name), &link)?;
    println!("Created link: {}", link_text);
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink_dir(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(original, link)
}

/// Remove the installed binary `bin` (e.g. `relion-3.1.0`) from `em_root`.
///
/// A link is resolved and both the link and the real folder are deleted.
/// An unversioned link left pointing at the removed version goes too.
/// Returns `false` when nothing was installed under that name.
pub fn remove_package(em_root: &Path, bin: &str) -> Result<bool, BuildError> {
    let path = em_root.join(bin);
    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(_) => return Ok(false),
    };

    println!("Removing {} binaries...", bin);
    if meta.file_type().is_symlink() {
        let real = fs::canonicalize(&path).ok();
        fs::remove_file(&path)?;
        if let Some(real) = real {
            remove_path(&real)?;
        }
    } else {
        remove_path(&path)?;
    }

    // Package names may contain dashes, so the unversioned link is found by
    // what it points at rather than by its name.
    let dangling: Vec<PathBuf> = fs::read_dir(em_root)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|link| {
            fs::read_link(link)
                .map(|target| target == Path::new(bin) || target == path)
                .unwrap_or(false)
        })
        .collect();
    for link in dangling {
        debug!("Removing link {}", link.display());
        fs::remove_file(&link)?;
    }

    println!("{}", style(format!("Binary {} has been uninstalled successfully", bin)).green());
    Ok(true)
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_create_link_replaces_old_link() {
        let dir = tempfile::tempdir().unwrap();
        let em = dir.path();
        fs::create_dir(em.join("tool-1.0")).unwrap();
        fs::create_dir(em.join("tool-2.0")).unwrap();

        create_package_link(em, "tool", "tool-1.0").unwrap();
        create_package_link(em, "tool", "tool-2.0").unwrap();

        assert_eq!(fs::read_link(em.join("tool")).unwrap(), Path::new("tool-2.0"));
    }

    #[test]
    fn test_create_link_requires_folder() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_package_link(dir.path(), "tool", "tool-1.0").unwrap_err();
        assert!(matches!(err, BuildError::Link { .. }));
    }

    #[test]
    fn test_create_link_refuses_real_folder() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tool")).unwrap();
        fs::create_dir(dir.path().join("tool-1.0")).unwrap();

        let err = create_package_link(dir.path(), "tool", "tool-1.0").unwrap_err();
        assert!(err.to_string().contains("is not a link"));
    }

    #[test]
    fn test_remove_package_follows_link() {
        let dir = tempfile::tempdir().unwrap();
        let em = dir.path();
        fs::create_dir(em.join("ctffind4")).unwrap();
        create_package_link(em, "ctffind-4.1.14", "ctffind4").unwrap();

        assert!(remove_package(em, "ctffind-4.1.14").unwrap());
        assert!(!em.join("ctffind4").exists());
        assert!(fs::symlink_metadata(em.join("ctffind-4.1.14")).is_err());
    }

    #[test]
    fn test_remove_package_drops_active_link() {
        let dir = tempfile::tempdir().unwrap();
        let em = dir.path();
        fs::create_dir(em.join("tool-1.0")).unwrap();
        fs::create_dir(em.join("tool-2.0")).unwrap();
        create_package_link(em, "tool", "tool-2.0").unwrap();

        // the inactive version leaves the link alone
        assert!(remove_package(em, "tool-1.0").unwrap());
        assert!(fs::symlink_metadata(em.join("tool")).is_ok());

        assert!(remove_package(em, "tool-2.0").unwrap());
        assert!(fs::symlink_metadata(em.join("tool")).is_err());
    }

    #[test]
    fn test_remove_dashed_package_drops_its_link() {
        let dir = tempfile::tempdir().unwrap();
        let em = dir.path();
        fs::create_dir(em.join("cryolo-1.0")).unwrap();
        fs::create_dir(em.join("cryolo-gpu-1.7")).unwrap();
        create_package_link(em, "cryolo", "cryolo-1.0").unwrap();
        create_package_link(em, "cryolo-gpu", "cryolo-gpu-1.7").unwrap();

        assert!(remove_package(em, "cryolo-gpu-1.7").unwrap());
        assert!(fs::symlink_metadata(em.join("cryolo-gpu")).is_err());
        // another package sharing the first word keeps its link
        assert_eq!(fs::read_link(em.join("cryolo")).unwrap(), Path::new("cryolo-1.0"));
    }

    #[test]
    fn test_remove_absent_package() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_package(dir.path(), "missing-1.0").unwrap());
    }
}
