//! `--install`: one symlink per command, pointing back at the binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::registry::AppletRegistry;

/// Outcome of an install run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    /// Directory the links were created in.
    pub dir: PathBuf,
    /// Link names created.
    pub installed: Vec<String>,
    /// Link names that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl InstallSummary {
    /// True if every link was created.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shell names that get a link. `bash` is recognised on argv[0] but never
/// installed, so a real bash on `$PATH` is not shadowed.
pub const INSTALLED_SHELLS: &[&str] = &["sh", "ash"];

/// Names that get a link: every command plus [`INSTALLED_SHELLS`].
pub fn link_names(registry: &AppletRegistry) -> Vec<String> {
    let mut names = registry.list_commands();
    names.extend(INSTALLED_SHELLS.iter().map(|s| s.to_string()));
    names.sort();
    names.dedup();
    names
}

/// Creates the links for `binary` in `dir` (default: the binary's own
/// directory), replacing whatever already has those names.
///
/// Links in the binary's directory point at its bare file name so the
/// tree can be moved; links elsewhere point at the absolute path.
pub fn install_links(
    registry: &AppletRegistry,
    binary: &Path,
    dir: Option<&Path>,
) -> Result<InstallSummary> {
    let binary = fs::canonicalize(binary)
        .with_context(|| format!("cannot resolve binary path {}", binary.display()))?;
    let binary_dir = binary
        .parent()
        .context("binary path has no parent directory")?
        .to_path_buf();
    let binary_name = binary
        .file_name()
        .context("binary path has no file name")?
        .to_os_string();

    let dir = match dir {
        Some(dir) => fs::canonicalize(dir)
            .with_context(|| format!("cannot use install directory {}", dir.display()))?,
        None => binary_dir.clone(),
    };
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let target = if dir == binary_dir {
        PathBuf::from(&binary_name)
    } else {
        binary.clone()
    };

    info!(dir = %dir.display(), target = %target.display(), "Installing command links");
    let mut summary = InstallSummary {
        dir: dir.clone(),
        ..Default::default()
    };
    for name in link_names(registry) {
        if binary_name == name.as_str() {
            continue;
        }
        let link = dir.join(&name);
        match replace_symlink(&target, &link) {
            Ok(()) => {
                debug!(link = %link.display(), "Installed");
                summary.installed.push(name);
            }
            Err(e) => summary.failed.push((name, format!("{:#}", e))),
        }
    }
    Ok(summary)
}

fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(link) {
        if meta.is_dir() {
            bail!("{} is a directory", link.display());
        }
        fs::remove_file(link).with_context(|| format!("cannot remove {}", link.display()))?;
    }
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("cannot create {}", link.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fake_binary(dir: &Path) -> PathBuf {
        let binary = dir.join("rustybox");
        fs::write(&binary, "").unwrap();
        binary
    }

    #[test]
    fn test_link_names() {
        let names = link_names(&AppletRegistry::default());
        assert!(names.contains(&"sh".to_string()));
        assert!(names.contains(&"ash".to_string()));
        assert!(names.contains(&"cat".to_string()));
        assert!(!names.contains(&"bash".to_string()));
    }

    #[test]
    fn test_install_next_to_binary() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(dir.path());
        // Stale entry that must be replaced.
        fs::write(dir.path().join("echo"), "old").unwrap();

        let registry = AppletRegistry::default();
        let summary = install_links(&registry, &binary, None).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.installed.len(), link_names(&registry).len());
        assert_eq!(
            fs::read_link(dir.path().join("echo")).unwrap(),
            PathBuf::from("rustybox")
        );
        assert_eq!(
            fs::read_link(dir.path().join("sh")).unwrap(),
            PathBuf::from("rustybox")
        );
    }

    #[test]
    fn test_install_elsewhere_uses_absolute_target() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(bin_dir.path());
        fs::create_dir(out_dir.path().join("cat")).unwrap();

        let summary =
            install_links(&AppletRegistry::default(), &binary, Some(out_dir.path())).unwrap();
        assert!(!summary.is_success());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "cat");
        assert_eq!(
            fs::read_link(out_dir.path().join("echo")).unwrap(),
            fs::canonicalize(&binary).unwrap()
        );
    }

    #[test]
    fn test_install_into_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(dir.path());
        let missing = dir.path().join("nope");
        assert!(install_links(&AppletRegistry::default(), &binary, Some(&missing)).is_err());
    }
}
