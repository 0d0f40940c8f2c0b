//! Privileges, configuration and emulator checks.

use nix::unistd::geteuid;
use std::path::Path;

use super::types::CheckResult;
use crate::builder::EMULATOR_DIR;
use crate::config::{GlobalConfig, Settings};

/// Mounting and chrooting need root.
pub fn check_root() -> CheckResult {
    if geteuid().is_root() {
        CheckResult::pass("running as root")
    } else {
        CheckResult::fail("running as root", "mount and chroot require root")
    }
}

pub fn check_config(global: &GlobalConfig, settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match global.repository() {
        Ok(repo) if repo.root().is_dir() => {
            results.push(CheckResult::pass_with("repository", &repo.root().display().to_string()))
        }
        Ok(repo) => results.push(CheckResult::warn(
            "repository",
            &format!("{} does not exist yet", repo.root().display()),
        )),
        Err(e) => results.push(CheckResult::fail("repository", &e.to_string())),
    }

    let system = settings.config_path("system");
    if system.is_dir() {
        results.push(CheckResult::pass("system templates"));
    } else {
        results.push(CheckResult::fail(
            "system templates",
            &format!("{} not found", system.display()),
        ));
    }

    results
}

/// Every emulated architecture needs its user-mode emulator on the host.
pub fn check_emulators(global: &GlobalConfig, settings: &Settings) -> Vec<CheckResult> {
    global
        .archs()
        .iter()
        .filter_map(|arch| global.arch_config(arch, settings).ok())
        .filter_map(|cfg| {
            let qemu = cfg.string("qemu")?;
            let name = format!("{} emulator", cfg.arch());
            let path = Path::new(EMULATOR_DIR).join(&qemu);
            Some(if path.is_file() {
                CheckResult::pass_with(&name, &path.display().to_string())
            } else {
                CheckResult::fail(&name, &format!("{} not found", path.display()))
            })
        })
        .collect()
}
