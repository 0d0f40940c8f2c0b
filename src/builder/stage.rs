//! Sandbox setup, stage builds and packing.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::Builder;
use crate::error::BuildError;
use crate::process::sh_quote;
use crate::repository::{Compression, Stage};

/// Where emulator binaries are looked up on the host, and installed to in
/// the sandbox.
pub const EMULATOR_DIR: &str = "/usr/bin";

const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// zstd level for stage tarballs.
const COMPRESSION_LEVEL: u32 = 19;

impl Builder<'_> {
    /// Fresh sandbox from the release stage3 tarball.
    ///
    /// The tarball and emulator are located before the old sandbox is
    /// touched, so a missing input leaves the previous state intact.
    pub(super) fn init(&self) -> Result<()> {
        let (tarball, compression) = self
            .repo
            .find_release_tarball(&self.arch, Stage::Stage3)
            .ok_or_else(|| {
                BuildError::MissingTarball(self.repo.root().join("release").join(&self.arch))
            })?;
        let emulator = self.emulator()?;

        self.progress("Preparing - cleanup");
        self.cleanup()?;

        self.progress("Unpacking stage3 tarball");
        self.unpack(&tarball, compression, emulator.as_deref())?;

        self.progress("Configuring");
        self.configure(true)?;

        self.progress("Copying binary packages");
        self.copy_binpkgs()?;

        self.check_profile()
    }

    /// Host path of the configured user-mode emulator, checked to exist.
    fn emulator(&self) -> Result<Option<PathBuf>> {
        let Some(qemu) = self.cfg.string("qemu") else {
            return Ok(None);
        };
        let path = Path::new(EMULATOR_DIR).join(qemu);
        if !path.is_file() {
            return Err(BuildError::MissingEmulator(path).into());
        }
        Ok(Some(path))
    }

    fn unpack(&self, tarball: &Path, compression: Compression, emulator: Option<&Path>) -> Result<()> {
        tracing::info!("unpacking {} into {}", tarball.display(), self.root.display());
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        self.run(&[format!(
            "cat {} | {} | tar -C {} -xp",
            sh_quote(tarball),
            compression.decompress_command(),
            sh_quote(&self.root)
        )])?;

        let resolv = self.root.join("etc/resolv.conf");
        if Path::new(HOST_RESOLV_CONF).is_file() {
            fs::create_dir_all(self.root.join("etc"))?;
            if resolv.symlink_metadata().is_ok() {
                fs::remove_file(&resolv)?;
            }
            fs::copy(HOST_RESOLV_CONF, &resolv)
                .with_context(|| format!("Failed to install {}", resolv.display()))?;
        } else {
            eprintln!("  [WARN] {} not found, sandbox may lack DNS", HOST_RESOLV_CONF);
        }

        let distfiles = self.root.join("var/cache/distfiles");
        fs::create_dir_all(&distfiles)
            .with_context(|| format!("Failed to create {}", distfiles.display()))?;

        if let Some(emulator) = emulator {
            let rel = emulator.strip_prefix("/").unwrap_or(emulator);
            let dst = self.root.join(rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(emulator, &dst)
                .with_context(|| format!("Failed to copy emulator to {}", dst.display()))?;
        }
        Ok(())
    }

    /// Seed the sandbox package cache from the repository's binary packages.
    fn copy_binpkgs(&self) -> Result<()> {
        let binpkgs = self.root.join("var/cache/binpkgs");
        fs::create_dir_all(&binpkgs)
            .with_context(|| format!("Failed to create {}", binpkgs.display()))?;

        let packages = self.repo.packages_dir(&self.arch);
        if !packages.is_dir() {
            println!("- no binary packages for {} yet", self.arch);
            return Ok(());
        }
        self.run(&[format!(
            "rsync -a -W {}/ {}",
            sh_quote(&packages),
            sh_quote(&binpkgs)
        )])
    }

    pub(super) fn build_stage3(&self) -> Result<()> {
        self.mounted(|| {
            println!("Updating portage tree");
            self.chrun(&["env-update", "emerge -q --sync", "env-update"], "/")?;

            println!("Updating gcc");
            self.chrun(
                &[
                    "emerge -q1u gcc binutils glibc",
                    "emerge -q --prune gcc binutils glibc",
                    "env-update",
                ],
                "/",
            )?;

            println!("Updating portage");
            self.chrun(&["emerge -q1u portage"], "/")?;

            println!("Updating system");
            self.chrun(
                &[
                    "emerge -qe @system --keep-going --with-bdeps=y",
                    "emerge -q --depclean",
                    "etc-update --automode -5",
                    "eselect news read",
                ],
                "/",
            )?;

            println!("Cleanup stage3");
            self.chrun(&["emerge -q --depclean"], "/")
        })
    }

    /// Rebuild the stage4 world set, then install the prebuilt kernel.
    pub(super) fn build_stage4(&self) -> Result<()> {
        self.build_world(&self.cfg.package_list("pkgs_stage4"), false)?;

        if self.cfg.bool("kernel") {
            let install = format!(
                "FEATURES='-buildpkg' emerge -q sys-kernel/{}",
                crate::repository::kernel_package_name(&self.arch)
            );
            self.mounted(|| self.chrun(&[install.as_str()], "/"))?;
        }
        Ok(())
    }

    /// Make the sandbox's world set exactly `packages` and bring it up to
    /// date. `clean` purges stale binary packages afterwards.
    pub fn build_world(&self, packages: &[String], clean: bool) -> Result<()> {
        let world = world_file(packages);
        let path = self.root.join("var/lib/portage/world");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, world).with_context(|| format!("Failed to write {}", path.display()))?;

        self.configure(true)?;

        let commands = world_update_commands(clean);
        self.mounted(|| self.chrun(&commands, "/"))
    }

    /// Pack the sandbox into `<build_dir>/<stage>-<arch>-latest.tar.zst`.
    pub(super) fn pack(&self, stage: Stage) -> Result<()> {
        self.configure(false)?;
        let tarball = self.settings.built_tarball(stage, &self.arch);
        self.run(&[pack_command(&self.root, &tarball, stage)])
    }
}

/// Contents of `var/lib/portage/world`: deduplicated, sorted, one atom per
/// line.
pub(super) fn world_file(packages: &[String]) -> String {
    let mut atoms: Vec<&str> = packages.iter().map(String::as_str).collect();
    atoms.sort_unstable();
    atoms.dedup();
    atoms.iter().map(|a| format!("{}\n", a)).collect()
}

pub(super) fn world_update_commands(clean: bool) -> Vec<String> {
    let update = "emerge -qDuN @world --with-bdeps=y --changed-deps=y --complete-graph=y --keep-going";
    let mut commands = vec![
        "env-update".to_string(),
        // Resolution failures are often transient; retry once as is.
        format!("{} || {}", update, update),
        "emerge -q @preserved-rebuild".to_string(),
        "emerge -q --depclean".to_string(),
        "etc-update --automode -5".to_string(),
    ];
    if clean {
        commands.push("eclean packages".to_string());
    }
    commands.push("eselect news read".to_string());
    commands
}

pub(super) fn pack_command(root: &Path, tarball: &Path, stage: Stage) -> String {
    let excludes = match stage {
        Stage::Stage3 => "--exclude 'var/cache/*' --exclude var/db/repos",
        Stage::Stage4 => "--exclude 'var/cache/*'",
    };
    format!(
        "tar -C {} {} -cp . | zstd -{} -T0 > {}",
        sh_quote(root),
        excludes,
        COMPRESSION_LEVEL,
        sh_quote(tarball)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_file_is_sorted_and_unique() {
        let pkgs: Vec<String> = ["sys-process/htop", "app-editors/vim", "sys-process/htop"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(world_file(&pkgs), "app-editors/vim\nsys-process/htop\n");
        assert_eq!(world_file(&[]), "");
    }

    #[test]
    fn test_world_update_retries_once() {
        let commands = world_update_commands(false);
        let update = commands
            .iter()
            .find(|c| c.contains("@world"))
            .unwrap();
        assert_eq!(update.matches("emerge -qDuN @world").count(), 2);
        assert!(update.contains(" || "));
        assert!(!commands.iter().any(|c| c == "eclean packages"));
        assert!(world_update_commands(true).iter().any(|c| c == "eclean packages"));
    }

    #[test]
    fn test_pack_excludes() {
        let root = Path::new("/b/amd64");
        let stage3 = pack_command(root, Path::new("/b/stage3.tar.zst"), Stage::Stage3);
        assert!(stage3.contains("--exclude var/db/repos"));
        assert!(stage3.contains("zstd -19 -T0 > /b/stage3.tar.zst"));

        let stage4 = pack_command(root, Path::new("/b/stage4.tar.zst"), Stage::Stage4);
        assert!(stage4.contains("--exclude 'var/cache/*'"));
        assert!(!stage4.contains("var/db/repos"));
    }
}
