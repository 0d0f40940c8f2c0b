//! Binary kernel packages.
//!
//! The kernel is configured and compiled in the `<arch>-kernel` clone of the
//! sandbox, packed into `kernel-gentoo-<arch>-bin-<ver>.tar.xz` and published
//! together with a generated ebuild, so later stage4 builds install it like
//! any other package.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::Builder;
use crate::config::ArchConfig;
use crate::error::BuildError;
use crate::fsutil;
use crate::process::sh_quote;
use crate::repository::{kernel_artifact_name, kernel_package_name, touch_timestamp};
use crate::template::write_file;

const KERNEL_SRC: &str = "/usr/src/linux";

/// Microarchitecture options that must be off before a specific CPU
/// optimization is enabled.
const GENERIC_CPU_OPTIONS: [&str; 3] = ["GENERIC_CPU", "MNATIVE_INTEL", "MNATIVE_AMD"];

/// Version from `emerge -qp "=sys-kernel/gentoo-sources-<series>*"` output.
pub fn parse_kernel_query(output: &str) -> Result<String> {
    let re = Regex::new(r"gentoo-sources-([^\s:\]]+)")?;
    re.captures(output)
        .map(|c| c[1].to_string())
        .ok_or_else(|| BuildError::VersionParse(output.trim().to_string()).into())
}

/// Local version string of an installed source tree:
/// `6.8.0` -> `6.8.0-gentoo`, `6.8.0-r1` -> `6.8.0-gentoo-r1`.
pub fn kernel_local_version(version: &str) -> String {
    match version.find("-r") {
        Some(idx) => format!("{}-gentoo{}", &version[..idx], &version[idx..]),
        None => format!("{}-gentoo", version),
    }
}

/// Package version from the `/usr/src/linux` link target:
/// `linux-6.8.0-gentoo-r1` -> `6.8.0-r1`.
pub fn parse_kernel_symlink(name: &str) -> Result<String> {
    let re = Regex::new(r"^linux-(.*)-gentoo(.*)$")?;
    re.captures(name)
        .map(|c| format!("{}{}", &c[1], &c[2]))
        .ok_or_else(|| BuildError::VersionParse(name.to_string()).into())
}

/// `scripts/config` edits applied on top of the base kernel config,
/// followed by `make olddefconfig`.
///
/// `kernel_config` names the CPU optimization option to turn on, e.g.
/// `MNATIVE_AMD` or `MZEN3`.
pub fn kernel_config_edits(cfg: &ArchConfig) -> Vec<String> {
    let mut edits = Vec::new();
    if let Some(option) = cfg.string("kernel_config") {
        for generic in GENERIC_CPU_OPTIONS {
            edits.push(format!("scripts/config -d CONFIG_{}", generic));
        }
        edits.push(format!("scripts/config -e CONFIG_{}", option));
    }
    if let Some(level) = cfg.string("compiler_isa_level") {
        edits.push(format!("scripts/config --set-val CONFIG_X86_64_VERSION {}", level));
    }
    edits.push("make olddefconfig".to_string());
    edits
}

/// Main kernel compile; `kernel_cflags` is handed to kbuild as `KCFLAGS`.
pub fn kernel_make_command(cfg: &ArchConfig, cores: usize) -> String {
    match cfg.string("kernel_cflags") {
        Some(flags) => format!("make -j{} KCFLAGS=\"{}\"", cores, flags),
        None => format!("make -j{}", cores),
    }
}

impl Builder<'_> {
    /// True when the repository already has the kernel the sandbox would
    /// install.
    pub fn kernel_check(&self) -> Result<bool> {
        self.mounted(|| {
            let version = self.kernel_version()?;
            Ok(self.repo.kernel_artifact(&self.arch, &version).is_file())
        })
    }

    /// Kernel package version to build: forced, or asked of portage.
    fn kernel_version(&self) -> Result<String> {
        let version = match self.cfg.string("kernel_force_version") {
            Some(version) => version,
            None => {
                let series = self.cfg.string("kernel").unwrap_or_default();
                let query = format!("emerge -qp \"=sys-kernel/gentoo-sources-{}*\"", series);
                let output = self.host.chroot_output(&self.root, "/", &query)?;
                parse_kernel_query(&output)?
            }
        };
        println!("- version is: {}", version);
        Ok(version)
    }

    /// Install kernel build dependencies, then clone the sandbox into the
    /// kernel root.
    pub(super) fn kernel_init(&self) -> Result<()> {
        let pkgs = self.cfg.string_list("kernel_build_pkgs");
        if !pkgs.is_empty() {
            let install = format!("emerge -q1u {}", pkgs.join(" "));
            self.mounted(|| self.chrun(&[install.as_str()], "/"))?;
        }

        let kernel = self.with_kernel_root();
        kernel.cleanup()?;
        self.run(&[format!(
            "cp -a --reflink=auto {} {}",
            sh_quote(&self.root),
            sh_quote(&kernel.root)
        )])
    }

    /// Build in the kernel root, then let the main sandbox pick up the new
    /// package.
    pub(super) fn kernel_build(&self) -> Result<()> {
        self.with_kernel_root().build_kernel_package()?;
        self.mounted(|| self.chrun(&["emerge --sync kernel"], "/"))
    }

    fn build_kernel_package(&self) -> Result<()> {
        self.configure(true)?;

        let initramfs = self.cfg.bool("initramfs");
        if initramfs {
            let conf = self.root.join("etc/genkernel.conf");
            fs::copy(self.settings.config_path("kernel/genkernel.conf"), &conf)
                .with_context(|| format!("Failed to install {}", conf.display()))?;
        }

        self.mounted(|| {
            let version = self.kernel_version()?;
            let local = kernel_local_version(&version);

            self.chrun(
                &[
                    format!("emerge -q1u \"=sys-kernel/gentoo-sources-{}\"", version),
                    format!("eselect kernel set linux-{}", local),
                ],
                "/",
            )?;
            self.verify_kernel_source(&version)?;

            let base_config = self.kernel_base_config();
            let dot_config = self.root.join("usr/src/linux/.config");
            fs::copy(&base_config, &dot_config).with_context(|| {
                format!("Failed to install kernel config {}", base_config.display())
            })?;
            self.chrun(&kernel_config_edits(&self.cfg), KERNEL_SRC)?;

            if initramfs {
                self.restore_genkernel_cache()?;
            }

            let dtbs = self.cfg.bool("kernel_dtbs");
            let mut make = vec![
                kernel_make_command(&self.cfg, self.settings.cores),
                "make modules_install".to_string(),
            ];
            if dtbs {
                make.push("DTC_FLAGS=\"-@\" make dtbs && make dtbs_install".to_string());
            }
            make.push("make install".to_string());
            self.chrun(&make, KERNEL_SRC)?;

            let mut seen = HashSet::new();
            let mut extra = self.cfg.string_list("kernel_pkgs");
            extra.retain(|p| seen.insert(p.clone()));
            if !extra.is_empty() {
                self.chrun(&[format!("emerge -q1 {}", extra.join(" "))], "/")?;
            }

            if initramfs {
                self.chrun(&["genkernel initramfs"], KERNEL_SRC)?;
            }

            let artifact = self.pack_kernel(&version, &local, initramfs, dtbs)?;
            self.publish_kernel(&version, &local, &artifact)
        })
    }

    /// Portage may have resolved a different version between the query and
    /// the install; the selected source tree must match.
    fn verify_kernel_source(&self, requested: &str) -> Result<()> {
        let link = self.root.join("usr/src/linux");
        let target = fs::read_link(&link)
            .with_context(|| format!("Failed to read {}", link.display()))?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let installed = parse_kernel_symlink(&name)?;
        if installed != requested {
            return Err(BuildError::VersionMismatch {
                requested: requested.to_string(),
                installed,
            }
            .into());
        }
        Ok(())
    }

    /// Forced config or `kernel-<os_arch>-<series>.config`, under
    /// `<config_dir>/kernel`.
    fn kernel_base_config(&self) -> PathBuf {
        let name = self
            .cfg
            .string("kernel_force_config")
            .unwrap_or_else(|| {
                let os_arch = self.cfg.string("os_arch").unwrap_or_else(|| self.arch.clone());
                let series = self.cfg.string("kernel").unwrap_or_default();
                format!("kernel-{}-{}.config", os_arch, series)
            });
        self.settings.config_path("kernel").join(name)
    }

    /// Reuse genkernel's work from a previous build of the same genkernel
    /// version.
    fn restore_genkernel_cache(&self) -> Result<()> {
        self.chrun(&["emerge -q1u sys-kernel/genkernel"], "/")?;
        let genkernel = self
            .host
            .chroot_output(&self.root, "/", "genkernel --version")?
            .trim()
            .to_string();
        if genkernel.is_empty() {
            return Ok(());
        }

        let cache = self.repo.genkernel_cache(&self.arch, &genkernel);
        if cache.is_dir() {
            println!("Found genkernel cache");
            let dst = self.root.join("var/cache/genkernel");
            fsutil::clear_dir(&dst)?;
            fsutil::copy_dir_recursive(&cache, &dst.join(&genkernel))?;
        }
        Ok(())
    }

    fn pack_kernel(&self, version: &str, local: &str, initramfs: bool, dtbs: bool) -> Result<PathBuf> {
        let name = kernel_artifact_name(&self.arch, version);
        let artifact = self.root.join("var/cache/distfiles").join(&name);

        let mut members = vec![
            format!("boot/config-{}", local),
            format!("boot/System.map-{}", local),
            format!("boot/vmlinuz-{}", local),
            format!("lib/modules/{}", local),
        ];
        if initramfs {
            members.push(format!("boot/initramfs-{}.img", local));
        }
        if dtbs {
            members.push(format!("boot/dtbs/{}", local));
        }

        self.run(&[format!(
            "tar -cJpf {} -C {} {}",
            sh_quote(&artifact),
            sh_quote(&self.root),
            members.join(" ")
        )])?;
        Ok(artifact)
    }

    /// Generate and digest the ebuild, then copy it and the artifact into
    /// the repository.
    fn publish_kernel(&self, version: &str, local: &str, artifact: &Path) -> Result<()> {
        let package = kernel_package_name(&self.arch);
        let ebuild_rel = format!("var/db/repos/kernel/sys-kernel/{}", package);
        let ebuild_dir = self.root.join(&ebuild_rel);
        fs::create_dir_all(&ebuild_dir)
            .with_context(|| format!("Failed to create {}", ebuild_dir.display()))?;

        let ebuild_name = format!("{}-{}.ebuild", package, version);
        let mut ctx = self.cfg.context(false);
        ctx.insert("kernel_version", version);
        ctx.insert("kernel_local_version", local);
        write_file(
            &self.settings.config_path("kernel/gentoo-bin.ebuild.tmpl"),
            &ebuild_dir.join(&ebuild_name),
            &ctx,
        )?;
        self.chrun(
            &[format!("ebuild --force /{}/{} digest", ebuild_rel, ebuild_name)],
            "/",
        )?;

        let repo_ebuilds = self.repo.kernel_ebuild_dir(&self.arch);
        fsutil::copy_dir_recursive(&ebuild_dir, &repo_ebuilds)?;
        touch_timestamp(&self.repo.repos_dir().join("kernel"))?;

        let kernel_dir = self.repo.kernel_dir(&self.arch);
        fs::create_dir_all(&kernel_dir)
            .with_context(|| format!("Failed to create {}", kernel_dir.display()))?;
        let dst = kernel_dir.join(kernel_artifact_name(&self.arch, version));
        fs::copy(artifact, &dst)
            .with_context(|| format!("Failed to publish {}", dst.display()))?;
        println!("- published {}", dst.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_kernel_query() {
        let out = "[ebuild  N     ] sys-kernel/gentoo-sources-6.8.0-r1::gentoo  USE=\"-build\"\n";
        assert_eq!(parse_kernel_query(out).unwrap(), "6.8.0-r1");
        assert_eq!(
            parse_kernel_query("[ebuild   R   ] sys-kernel/gentoo-sources-6.8.0 ").unwrap(),
            "6.8.0"
        );
    }

    #[test]
    fn test_parse_kernel_query_rejects_garbage() {
        let err = parse_kernel_query("emerge: there are no ebuilds to satisfy").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::VersionParse(_))
        ));
    }

    #[test]
    fn test_local_version_round_trip() {
        assert_eq!(kernel_local_version("6.8.0"), "6.8.0-gentoo");
        assert_eq!(kernel_local_version("6.8.0-r1"), "6.8.0-gentoo-r1");
        assert_eq!(parse_kernel_symlink("linux-6.8.0-gentoo-r1").unwrap(), "6.8.0-r1");
        assert_eq!(parse_kernel_symlink("linux-6.8.0-gentoo").unwrap(), "6.8.0");
        assert!(parse_kernel_symlink("linux-6.8.0").is_err());
    }

    #[test]
    fn test_config_edits() {
        let mut values = BTreeMap::new();
        values.insert("kernel_config".to_string(), Value::from("MZEN3"));
        values.insert("compiler_isa_level".to_string(), Value::from(3u64));
        let edits = kernel_config_edits(&ArchConfig::from_map(values));
        assert_eq!(
            edits,
            [
                "scripts/config -d CONFIG_GENERIC_CPU",
                "scripts/config -d CONFIG_MNATIVE_INTEL",
                "scripts/config -d CONFIG_MNATIVE_AMD",
                "scripts/config -e CONFIG_MZEN3",
                "scripts/config --set-val CONFIG_X86_64_VERSION 3",
                "make olddefconfig",
            ]
        );

        let plain = kernel_config_edits(&ArchConfig::default());
        assert_eq!(plain, ["make olddefconfig"]);
    }

    #[test]
    fn test_kernel_config_names_cpu_option() {
        let mut values = BTreeMap::new();
        values.insert("kernel_config".to_string(), Value::from("MNATIVE_AMD"));
        let edits = kernel_config_edits(&ArchConfig::from_map(values));
        assert_eq!(edits.len(), 5);
        assert_eq!(edits[3], "scripts/config -e CONFIG_MNATIVE_AMD");
        assert_eq!(edits[4], "make olddefconfig");
    }

    #[test]
    fn test_make_command_passes_cflags() {
        assert_eq!(kernel_make_command(&ArchConfig::default(), 8), "make -j8");

        let mut values = BTreeMap::new();
        values.insert("kernel_cflags".to_string(), Value::from("-march=znver3 -O2"));
        assert_eq!(
            kernel_make_command(&ArchConfig::from_map(values), 8),
            "make -j8 KCFLAGS=\"-march=znver3 -O2\""
        );
    }
}
