//! Syncing the package metadata trees kept in `<repo>/repos`.
//!
//! Portage is pointed at a throwaway config root whose `repos.conf` is
//! rendered from `<config_dir>/repos-sync` with `repository` set to the
//! repos directory, so syncing never depends on the host's own portage
//! configuration.

use anyhow::{Context as _, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::fsutil;
use crate::host::Host;
use crate::process::sh_quote;
use crate::repository::{touch_timestamp, Repository};
use crate::template::{render_tree, Context};

/// Sync `repos` (every configured repository when empty).
pub fn sync_repos(
    settings: &Settings,
    repo: &Repository,
    host: &dyn Host,
    repos: &[String],
) -> Result<()> {
    let repos_dir = repo.repos_dir();
    fs::create_dir_all(&repos_dir)
        .with_context(|| format!("Failed to create {}", repos_dir.display()))?;

    let config_root = settings.sync_root();
    fsutil::remove_path(&config_root)?;
    let repos_conf = config_root.join("etc/portage/repos.conf");
    fs::create_dir_all(&repos_conf)
        .with_context(|| format!("Failed to create {}", repos_conf.display()))?;

    let mut ctx = Context::new();
    ctx.insert("repository", repos_dir.to_string_lossy().into_owned());
    render_tree(&settings.config_path("repos-sync"), &repos_conf, &ctx)?;
    fsutil::replace_symlink(
        &repos_dir.join("gentoo/profiles/default"),
        &config_root.join("etc/portage/make.profile"),
    )?;

    println!("Syncing repositories");
    host.run(&[sync_command(&config_root, repos)])?;

    for tree in vcs_trees(&repos_dir)? {
        tracing::debug!("touching timestamp in {}", tree.display());
        touch_timestamp(&tree)?;
    }

    let kernel_repo = repos_dir.join("kernel");
    if !kernel_repo.exists() {
        println!("Creating kernel repository");
        render_tree(&settings.config_path("kernel/repo"), &kernel_repo, &Context::new())?;
    }

    fsutil::remove_path(&config_root)
}

fn sync_command(config_root: &Path, repos: &[String]) -> String {
    let mut command = format!("PORTAGE_CONFIGROOT={} emerge --sync", sh_quote(config_root));
    for name in repos {
        command.push(' ');
        command.push_str(name);
    }
    command
}

/// Trees under `repos_dir` synced from git or mercurial. Those don't get a
/// `metadata/timestamp.chk` from the sync itself.
fn vcs_trees(repos_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut trees: Vec<PathBuf> = fs::read_dir(repos_dir)
        .with_context(|| format!("Failed to read {}", repos_dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    trees.retain(|tree| tree.join(".git").exists() || tree.join(".hg").exists());
    trees.sort();
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sync_command() {
        let root = Path::new("/build-tmp/tmp");
        assert_eq!(
            sync_command(root, &[]),
            "PORTAGE_CONFIGROOT=/build-tmp/tmp emerge --sync"
        );
        assert_eq!(
            sync_command(root, &["gentoo".into(), "guru".into()]),
            "PORTAGE_CONFIGROOT=/build-tmp/tmp emerge --sync gentoo guru"
        );
    }

    #[test]
    fn test_vcs_trees() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("gentoo/metadata")).unwrap();
        fs::create_dir_all(dir.path().join("guru/.git")).unwrap();
        fs::create_dir_all(dir.path().join("local/.hg")).unwrap();

        let trees = vcs_trees(dir.path()).unwrap();
        assert_eq!(trees, [dir.path().join("guru"), dir.path().join("local")]);
    }
}
