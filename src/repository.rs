//! Path-addressed layout of the artifact repository.
//!
//! ```text
//! <repo>/release/<arch>/{stage3,stage4}-<arch>-latest.tar.{zst,xz,bz2}
//! <repo>/packages/<arch>/...
//! <repo>/kernel/<arch>/kernel-gentoo-<arch>-bin-<ver>.tar.xz
//! <repo>/genkernel/<arch>/<genkernel-version>/...
//! <repo>/repos/<name>/...
//! ```

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Stage3,
    Stage4,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Stage3, Stage::Stage4];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Stage3 => "stage3",
            Stage::Stage4 => "stage4",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tarball compression formats, in unpack preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zst,
    Xz,
    Bz2,
}

impl Compression {
    pub const PREFERENCE: [Compression; 3] = [Compression::Zst, Compression::Xz, Compression::Bz2];

    pub fn extension(self) -> &'static str {
        match self {
            Compression::Zst => "zst",
            Compression::Xz => "xz",
            Compression::Bz2 => "bz2",
        }
    }

    /// Filter command that decompresses stdin to stdout.
    pub fn decompress_command(self) -> &'static str {
        match self {
            Compression::Zst => "zstd -d -T0",
            Compression::Xz => "xz -d",
            Compression::Bz2 => "bzip2 -d",
        }
    }
}

/// `<stage>-<arch>-latest.tar.<ext>`
pub fn tarball_name(stage: Stage, arch: &str, compression: Compression) -> String {
    format!("{}-{}-latest.tar.{}", stage, arch, compression.extension())
}

/// `kernel-gentoo-<arch>-bin-<version>.tar.xz`
pub fn kernel_artifact_name(arch: &str, version: &str) -> String {
    format!("kernel-gentoo-{}-bin-{}.tar.xz", arch, version)
}

/// Name of the binary kernel package for `arch`, e.g. `gentoo-amd64-bin`.
pub fn kernel_package_name(arch: &str) -> String {
    format!("gentoo-{}-bin", arch)
}

#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn release_tarball(&self, arch: &str, stage: Stage, compression: Compression) -> PathBuf {
        self.root
            .join("release")
            .join(arch)
            .join(tarball_name(stage, arch, compression))
    }

    /// First existing release tarball for `stage`, zst before xz before bz2.
    pub fn find_release_tarball(&self, arch: &str, stage: Stage) -> Option<(PathBuf, Compression)> {
        Compression::PREFERENCE
            .into_iter()
            .map(|c| (self.release_tarball(arch, stage, c), c))
            .find(|(path, _)| path.is_file())
    }

    pub fn packages_dir(&self, arch: &str) -> PathBuf {
        self.root.join("packages").join(arch)
    }

    pub fn kernel_dir(&self, arch: &str) -> PathBuf {
        self.root.join("kernel").join(arch)
    }

    pub fn kernel_artifact(&self, arch: &str, version: &str) -> PathBuf {
        self.kernel_dir(arch).join(kernel_artifact_name(arch, version))
    }

    pub fn genkernel_dir(&self, arch: &str) -> PathBuf {
        self.root.join("genkernel").join(arch)
    }

    pub fn genkernel_cache(&self, arch: &str, genkernel_version: &str) -> PathBuf {
        self.genkernel_dir(arch).join(genkernel_version)
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    /// Where the kernel repository keeps the ebuilds for `arch`.
    pub fn kernel_ebuild_dir(&self, arch: &str) -> PathBuf {
        self.repos_dir()
            .join("kernel")
            .join("sys-kernel")
            .join(kernel_package_name(arch))
    }
}

/// Touch `<tree>/metadata/timestamp.chk` so portage treats the tree as
/// freshly synced.
pub fn touch_timestamp(tree: &Path) -> Result<()> {
    let metadata = tree.join("metadata");
    fs::create_dir_all(&metadata)
        .with_context(|| format!("Failed to create {}", metadata.display()))?;
    let stamp = metadata.join("timestamp.chk");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stamp)
        .with_context(|| format!("Failed to open {}", stamp.display()))?;
    file.set_modified(SystemTime::now())
        .with_context(|| format!("Failed to touch {}", stamp.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let repo = Repository::new("/srv/repo");
        assert_eq!(
            repo.release_tarball("amd64", Stage::Stage3, Compression::Xz),
            PathBuf::from("/srv/repo/release/amd64/stage3-amd64-latest.tar.xz")
        );
        assert_eq!(
            repo.kernel_artifact("amd64", "6.8.0"),
            PathBuf::from("/srv/repo/kernel/amd64/kernel-gentoo-amd64-bin-6.8.0.tar.xz")
        );
        assert_eq!(
            repo.kernel_ebuild_dir("arm64"),
            PathBuf::from("/srv/repo/repos/kernel/sys-kernel/gentoo-arm64-bin")
        );
    }

    #[test]
    fn test_find_release_tarball_prefers_zst() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::new(dir.path());
        let release = dir.path().join("release/amd64");
        fs::create_dir_all(&release).unwrap();

        assert!(repo.find_release_tarball("amd64", Stage::Stage3).is_none());

        fs::write(release.join("stage3-amd64-latest.tar.bz2"), "").unwrap();
        let (_, found) = repo.find_release_tarball("amd64", Stage::Stage3).unwrap();
        assert_eq!(found, Compression::Bz2);

        fs::write(release.join("stage3-amd64-latest.tar.xz"), "").unwrap();
        let (_, found) = repo.find_release_tarball("amd64", Stage::Stage3).unwrap();
        assert_eq!(found, Compression::Xz);

        fs::write(release.join("stage3-amd64-latest.tar.zst"), "").unwrap();
        let (path, found) = repo.find_release_tarball("amd64", Stage::Stage3).unwrap();
        assert_eq!(found, Compression::Zst);
        assert!(path.ends_with("stage3-amd64-latest.tar.zst"));
    }

    #[test]
    fn test_touch_timestamp_creates_marker() {
        let dir = TempDir::new().unwrap();
        touch_timestamp(dir.path()).unwrap();
        assert!(dir.path().join("metadata/timestamp.chk").is_file());
        touch_timestamp(dir.path()).unwrap();
    }
}
