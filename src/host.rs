//! The boundary between the build orchestration and the operating system.
//!
//! Everything that needs root, spawns processes or touches mounts goes
//! through [`Host`]. [`SystemHost`] does it for real; tests substitute a
//! recorder and drive the builder against a temporary directory.

use anyhow::Result;
use std::path::Path;

use crate::process;
use crate::sandbox;

pub trait Host {
    /// Run shell commands on the host, stopping at the first failure.
    /// Empty entries are skipped.
    fn run(&self, commands: &[String]) -> Result<()>;

    /// Mount `proc`, `dev` and `sys` under `root`.
    fn mount(&self, root: &Path) -> Result<()>;

    /// Detach the pseudo filesystems under `root`. A no-op when nothing is
    /// mounted; never fails.
    fn unmount(&self, root: &Path);

    /// Run shell commands chrooted into `root` with `workdir` as current
    /// directory, stopping at the first failure.
    fn chroot_run(&self, root: &Path, workdir: &str, commands: &[String]) -> Result<()>;

    /// Run one command chrooted into `root` and return its stdout.
    fn chroot_output(&self, root: &Path, workdir: &str, command: &str) -> Result<String>;

    /// Run an interactive program chrooted into `root`.
    fn chroot_interactive(&self, root: &Path, workdir: &str, program: &str) -> Result<()>;
}

/// Executes everything on the machine stagebuild runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, commands: &[String]) -> Result<()> {
        process::run_command_list(commands)
    }

    fn mount(&self, root: &Path) -> Result<()> {
        sandbox::mount_pseudo_fs(root)
    }

    fn unmount(&self, root: &Path) {
        sandbox::unmount_pseudo_fs(root)
    }

    fn chroot_run(&self, root: &Path, workdir: &str, commands: &[String]) -> Result<()> {
        sandbox::chroot_commands(root, workdir, commands)
    }

    fn chroot_output(&self, root: &Path, workdir: &str, command: &str) -> Result<String> {
        sandbox::chroot_output(root, workdir, command)
    }

    fn chroot_interactive(&self, root: &Path, workdir: &str, program: &str) -> Result<()> {
        sandbox::chroot_interactive(root, workdir, program)
    }
}
