//! CLI command handlers.
//!
//! Each submodule handles one subcommand. Commands that act on
//! architectures resolve the `--arch` selection through a [`Session`] and
//! run one [`Builder`] per architecture, in order.

mod build;
mod configure;
mod delpkg;
mod exec;
mod gcc_compare;
mod preflight;
mod shell;
mod sync;

pub use build::{cmd_apply, cmd_build};
pub use configure::cmd_configure;
pub use delpkg::cmd_delpkg;
pub use exec::cmd_exec;
pub use gcc_compare::cmd_gcc_compare;
pub use preflight::cmd_preflight;
pub use shell::cmd_shell;
pub use sync::cmd_sync;

use anyhow::Result;

use stagebuild::config::{GlobalConfig, Settings};
use stagebuild::host::SystemHost;
use stagebuild::notify::{self, Notifier};
use stagebuild::{BuildError, Builder};

/// Everything a command needs: settings, loaded configuration, the
/// architecture selection and the host/notifier builders run against.
pub struct Session {
    pub settings: Settings,
    pub global: GlobalConfig,
    arch: Option<String>,
    host: SystemHost,
    notifier: Box<dyn Notifier>,
}

impl Session {
    pub fn load(settings: Settings, arch: Option<String>) -> Result<Self> {
        let global = GlobalConfig::load(&settings.config_dir)?;
        let notifier = notify::notifier(settings.notify);
        Ok(Self {
            settings,
            global,
            arch,
            host: SystemHost,
            notifier,
        })
    }

    /// Architectures selected with `--arch`.
    pub fn archs(&self) -> Result<Vec<String>> {
        let selection = self
            .arch
            .as_deref()
            .ok_or_else(|| BuildError::Usage("no arch provided (use --arch)".to_string()))?;
        self.global.resolve_archs(selection)
    }

    pub fn builder(&self, arch: &str) -> Result<Builder<'_>> {
        Builder::new(
            arch,
            &self.global,
            &self.settings,
            &self.host,
            self.notifier.as_ref(),
        )
    }

    /// Run `action` for every selected architecture, stopping at the first
    /// failure.
    pub fn for_each_builder(&self, mut action: impl FnMut(&Builder<'_>) -> Result<()>) -> Result<()> {
        for arch in self.archs()? {
            action(&self.builder(&arch)?)?;
        }
        Ok(())
    }
}
