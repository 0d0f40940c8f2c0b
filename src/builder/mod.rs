//! Per-architecture build orchestration.
//!
//! A [`Builder`] owns one architecture's sandbox under
//! `<build_dir>/<arch>` and sequences the build phases against it:
//!
//! ```text
//! init -> stage3 (build, pack) -> kernel gate -> kernel_init -> kernel_build
//!      -> stage4 (build, pack) -> binpkgs
//! ```
//!
//! Kernels are built in a sibling `<arch>-kernel` root cloned from the main
//! sandbox, so package rebuilds for the kernel never leak into the stage.

mod apply;
mod kernel;
mod profile;
mod stage;

pub use kernel::{
    kernel_config_edits, kernel_local_version, kernel_make_command, parse_kernel_query,
    parse_kernel_symlink,
};
pub use stage::EMULATOR_DIR;
pub use profile::{classify_profile, split_profile_link, ProfileState, CANONICAL_BASE};

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::{ArchConfig, GlobalConfig, Settings};
use crate::host::Host;
use crate::notify::Notifier;
use crate::phase::{Phase, PhaseSet};
use crate::repository::{Repository, Stage};
use crate::sandbox;
use crate::template::render_tree;
use crate::timing::Timer;

/// Builds one architecture.
pub struct Builder<'a> {
    arch: String,
    cfg: Rc<ArchConfig>,
    settings: &'a Settings,
    host: &'a dyn Host,
    notifier: &'a dyn Notifier,
    repo: Repository,
    root: PathBuf,
}

impl<'a> Builder<'a> {
    pub fn new(
        arch: &str,
        global: &GlobalConfig,
        settings: &'a Settings,
        host: &'a dyn Host,
        notifier: &'a dyn Notifier,
    ) -> Result<Self> {
        let cfg = global.arch_config(arch, settings)?;
        Ok(Self {
            arch: arch.to_string(),
            cfg: Rc::new(cfg),
            settings,
            host,
            notifier,
            repo: global.repository()?,
            root: settings.sandbox_root(arch),
        })
    }

    /// The same builder pointed at the `<arch>-kernel` sandbox.
    pub fn with_kernel_root(&self) -> Builder<'a> {
        let mut name = self.root.as_os_str().to_owned();
        name.push("-kernel");
        Builder {
            arch: self.arch.clone(),
            cfg: Rc::clone(&self.cfg),
            settings: self.settings,
            host: self.host,
            notifier: self.notifier,
            repo: self.repo.clone(),
            root: PathBuf::from(name),
        }
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ArchConfig {
        &self.cfg
    }

    /// Run the requested phases in their fixed order.
    ///
    /// A failure is reported to the notifier once, then returned.
    pub fn build(&self, phases: &PhaseSet) -> Result<()> {
        tracing::info!("building {} with phases {}", self.arch, phases);
        match self.run_phases(phases.clone()) {
            Ok(()) => {
                self.progress("Finished");
                Ok(())
            }
            Err(e) => {
                self.notifier
                    .notify(&self.arch, &format!("Build failed: {:#}", e));
                Err(e)
            }
        }
    }

    fn run_phases(&self, mut phases: PhaseSet) -> Result<()> {
        if phases.contains(Phase::Init) {
            self.timed("init", || self.init())?;
        } else {
            self.host.unmount(&self.root);
        }

        if phases.stage3_build() {
            self.progress("Building stage3");
            self.timed("stage3 build", || self.build_stage3())?;
        }

        if phases.stage3_pack() {
            self.progress("Creating stage3 tarball");
            self.timed("stage3 pack", || self.pack(Stage::Stage3))?;
        }

        if self.cfg.bool("kernel") {
            if phases.contains(Phase::Kernel) {
                self.progress("Checking if we need to build new kernel");
                if self.kernel_check()? {
                    self.progress("- latest kernel available");
                } else {
                    phases.insert(Phase::KernelInit);
                    phases.insert(Phase::KernelBuild);
                }
            }

            if phases.contains(Phase::KernelInit) {
                self.progress("Preparing kernel build environment");
                self.timed("kernel init", || self.kernel_init())?;
            }

            if phases.contains(Phase::KernelBuild) {
                self.progress("Building kernel");
                self.timed("kernel build", || self.kernel_build())?;
            }
        }

        if phases.stage4_build() {
            self.progress("Building stage4");
            self.timed("stage4 build", || self.build_stage4())?;
        }

        if phases.stage4_pack() {
            self.progress("Creating stage4 tarball");
            self.timed("stage4 pack", || self.pack(Stage::Stage4))?;
        }

        if phases.contains(Phase::Binpkgs) {
            self.progress("Building other binary packages");
            self.timed("binpkgs", || {
                self.build_world(&self.cfg.package_list("pkgs_all"), true)
            })?;
        }

        Ok(())
    }

    fn timed(&self, label: &str, step: impl FnOnce() -> Result<()>) -> Result<()> {
        let timer = Timer::start(format!("{} {}", self.arch, label));
        step()?;
        timer.finish();
        Ok(())
    }

    /// Print a progress line and relay it to the notifier.
    fn progress(&self, message: &str) {
        println!("{}", message);
        self.notifier.notify(&self.arch, message);
    }

    /// Render `<config_dir>/system` into the sandbox. `for_build` sets the
    /// `build` key, which templates use to switch on build-only settings.
    pub fn configure(&self, for_build: bool) -> Result<()> {
        let ctx = self.cfg.context(for_build);
        render_tree(&self.settings.config_path("system"), &self.root, &ctx)
    }

    /// Run `body` with the sandbox's pseudo filesystems mounted.
    fn mounted<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        sandbox::with_mounts(self.host, &self.root, body)
    }

    /// Run commands inside the sandbox, failing fast.
    fn chrun<S: AsRef<str>>(&self, commands: &[S], workdir: &str) -> Result<()> {
        let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_string()).collect();
        self.host.chroot_run(&self.root, workdir, &commands)
    }

    /// Run commands on the host, failing fast.
    fn run<S: AsRef<str>>(&self, commands: &[S]) -> Result<()> {
        let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_string()).collect();
        self.host.run(&commands)
    }

    /// Unmount and delete this builder's sandbox root.
    pub fn cleanup(&self) -> Result<()> {
        sandbox::cleanup(self.host, &self.root)
    }

    /// Run an arbitrary shell command in the mounted sandbox.
    pub fn exec_command(&self, command: &str) -> Result<()> {
        println!("Executing action for {}", self.arch);
        self.mounted(|| self.chrun(&[command], "/"))
    }

    /// Interactive shell in the sandbox, or in the kernel sandbox.
    pub fn shell(&self, kernel: bool) -> Result<()> {
        if kernel {
            return self.with_kernel_root().shell(false);
        }
        self.mounted(|| self.host.chroot_interactive(&self.root, "/root", "/bin/bash"))
    }
}
