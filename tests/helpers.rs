//! Shared test utilities for stagebuild tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use stagebuild::config::{GlobalConfig, Settings};
use stagebuild::host::Host;
use stagebuild::notify::Notifier;
use stagebuild::BuildError;

pub const PROFILE: &str = "default/linux/amd64/23.0";

/// Temporary config dir, build dir and artifact repository.
pub struct TestEnv {
    /// Kept alive for the lifetime of the TestEnv
    pub _temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub build_dir: PathBuf,
    pub repo: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let config_dir = base.join("config");
        let build_dir = base.join("build-tmp");
        let repo = base.join("repo");
        for dir in [&config_dir, &build_dir, &repo] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        let env = Self {
            _temp_dir: temp_dir,
            config_dir,
            build_dir,
            repo,
        };
        env.write_config("");
        env.write_system_templates();
        env
    }

    /// Write `config.yml` with the standard test archs plus `extra` global
    /// keys.
    pub fn write_config(&self, extra: &str) {
        let yaml = format!(
            r#"repository: {repo}
profile: {PROFILE}
pkgs_stage4: world_stage4
pkgs_all: world_all
world_stage4:
  - sys-process/htop
  - app-editors/vim
world_all:
  - app-editors/vim
  - [app-misc/tmux, app-editors/vim]
archs:
  amd64:
    kernel: "6.8"
    os_arch: x86_64
  arm64:
    qemu: stagebuild-test-missing-qemu
  x86:
groups:
  pc: [amd64, x86]
{extra}
"#,
            repo = self.repo.display(),
        );
        fs::write(self.config_dir.join("config.yml"), yaml).expect("Failed to write config");
    }

    fn write_system_templates(&self) {
        let portage = self.config_dir.join("system/etc/portage");
        fs::create_dir_all(&portage).expect("Failed to create system templates");
        fs::write(
            portage.join("make.conf.tmpl"),
            "MAKEOPTS=\"-j{{ cores }}\"\n{% if build %}\nFEATURES=\"buildpkg\"\n{% end %}\n",
        )
        .expect("Failed to write make.conf template");
    }

    pub fn settings(&self) -> Settings {
        Settings {
            config_dir: self.config_dir.clone(),
            build_dir: self.build_dir.clone(),
            cores: 4,
            ..Settings::default()
        }
    }

    pub fn global(&self) -> GlobalConfig {
        GlobalConfig::load_with_user(&self.config_dir.join("config.yml"), None)
            .expect("Failed to load test config")
    }

    pub fn root(&self, arch: &str) -> PathBuf {
        self.build_dir.join(arch)
    }

    /// Put a release stage3 tarball for `arch` into the repository.
    pub fn seed_stage3(&self, arch: &str, ext: &str) -> PathBuf {
        let dir = self.repo.join("release").join(arch);
        fs::create_dir_all(&dir).expect("Failed to create release dir");
        let path = dir.join(format!("stage3-{}-latest.tar.{}", arch, ext));
        fs::write(&path, ext).expect("Failed to write tarball");
        path
    }
}

// =============================================================================
// Recording host
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Run(String),
    Mount(PathBuf),
    Unmount(PathBuf),
    Chroot { root: PathBuf, workdir: String, command: String },
    Output { root: PathBuf, command: String },
    Interactive { root: PathBuf, program: String },
}

type Hook = Box<dyn Fn(&str)>;

/// Host double: records every operation, answers `chroot_output` from
/// canned responses and fails commands matching `fail_on`.
#[derive(Default)]
pub struct RecordingHost {
    calls: RefCell<Vec<Call>>,
    outputs: Vec<(String, String)>,
    fail_on: Option<String>,
    on_run: Option<Hook>,
    mounted: RefCell<BTreeSet<PathBuf>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `chroot_output` commands containing `pattern` with `stdout`.
    pub fn with_output(mut self, pattern: &str, stdout: &str) -> Self {
        self.outputs.push((pattern.to_string(), stdout.to_string()));
        self
    }

    /// Fail any host or chroot command containing `pattern`.
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    /// Called with every host command before it is recorded as run.
    pub fn on_run(mut self, hook: impl Fn(&str) + 'static) -> Self {
        self.on_run = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn host_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub fn chroot_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Chroot { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn is_mounted(&self, root: &Path) -> bool {
        self.mounted.borrow().contains(root)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    fn check(&self, command: &str) -> anyhow::Result<()> {
        match &self.fail_on {
            Some(pattern) if command.contains(pattern.as_str()) => Err(BuildError::CommandFailed {
                command: command.to_string(),
                code: 1,
            }
            .into()),
            _ => Ok(()),
        }
    }
}

impl Host for RecordingHost {
    fn run(&self, commands: &[String]) -> anyhow::Result<()> {
        for command in commands.iter().filter(|c| !c.trim().is_empty()) {
            self.calls.borrow_mut().push(Call::Run(command.clone()));
            self.check(command)?;
            if let Some(hook) = &self.on_run {
                hook(command);
            }
        }
        Ok(())
    }

    fn mount(&self, root: &Path) -> anyhow::Result<()> {
        self.calls.borrow_mut().push(Call::Mount(root.to_path_buf()));
        self.mounted.borrow_mut().insert(root.to_path_buf());
        Ok(())
    }

    fn unmount(&self, root: &Path) {
        self.calls.borrow_mut().push(Call::Unmount(root.to_path_buf()));
        self.mounted.borrow_mut().remove(root);
    }

    fn chroot_run(&self, root: &Path, workdir: &str, commands: &[String]) -> anyhow::Result<()> {
        for command in commands.iter().filter(|c| !c.trim().is_empty()) {
            self.calls.borrow_mut().push(Call::Chroot {
                root: root.to_path_buf(),
                workdir: workdir.to_string(),
                command: command.clone(),
            });
            self.check(command)?;
        }
        Ok(())
    }

    fn chroot_output(&self, root: &Path, _workdir: &str, command: &str) -> anyhow::Result<String> {
        self.calls.borrow_mut().push(Call::Output {
            root: root.to_path_buf(),
            command: command.to_string(),
        });
        self.check(command)?;
        Ok(self
            .outputs
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    fn chroot_interactive(&self, root: &Path, _workdir: &str, program: &str) -> anyhow::Result<()> {
        self.calls.borrow_mut().push(Call::Interactive {
            root: root.to_path_buf(),
            program: program.to_string(),
        });
        Ok(())
    }
}

/// Hook that plays the part of `tar -x` for a stage3 unpack into `root`:
/// creates the profile link pointing at `profile_target`.
pub fn fake_unpack(root: PathBuf, profile_target: String) -> impl Fn(&str) {
    move |command: &str| {
        if command.contains("-xp") {
            let portage = root.join("etc/portage");
            fs::create_dir_all(&portage).expect("Failed to create etc/portage");
            let _ = fs::remove_file(portage.join("make.profile"));
            symlink(&profile_target, portage.join("make.profile"))
                .expect("Failed to create profile link");
        }
    }
}

// =============================================================================
// Recording notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: RefCell<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, arch: &str, message: &str) {
        self.messages
            .borrow_mut()
            .push((arch.to_string(), message.to_string()));
    }
}

impl RecordingNotifier {
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.borrow().iter().any(|(_, m)| m.contains(needle))
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Sorted list of every path under `dir`, with file contents, for
/// before/after comparisons.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut entries: Vec<(PathBuf, Vec<u8>)> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| {
            let content = if e.file_type().is_file() {
                fs::read(e.path()).unwrap_or_default()
            } else {
                Vec::new()
            };
            (e.path().to_path_buf(), content)
        })
        .collect();
    entries.sort();
    entries
}

pub fn assert_file_contains(path: &Path, needle: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        content.contains(needle),
        "{} should contain {:?}, got:\n{}",
        path.display(),
        needle,
        content
    );
}
