//! Optional progress notifications.
//!
//! A notification is a short message tagged with the architecture. Delivery
//! problems are logged and otherwise ignored; they never fail a build.

use std::env;

use crate::process::Cmd;

/// Environment variable holding the notification command.
pub const NOTIFY_COMMAND_ENV: &str = "STAGEBUILD_NOTIFY_COMMAND";

pub trait Notifier {
    fn notify(&self, arch: &str, message: &str);
}

/// Drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _arch: &str, _message: &str) {}
}

/// Runs a command with `"[<arch>] <message>"` appended as a final argument.
///
/// The command line is split on whitespace, e.g.
/// `STAGEBUILD_NOTIFY_COMMAND="matrix-commander --room builds -m"`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    /// Notifier configured through the environment (or `.env`), if any.
    pub fn from_env() -> Option<Self> {
        env::var(NOTIFY_COMMAND_ENV).ok().and_then(|c| Self::new(&c))
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, arch: &str, message: &str) {
        let text = format!("[{}] {}", arch, message);
        let result = Cmd::new(&self.program)
            .args(&self.args)
            .arg(&text)
            .error_msg("notification command failed")
            .run();
        if let Err(e) = result {
            tracing::warn!("failed to deliver notification: {:#}", e);
        }
    }
}

/// The notifier for this invocation: a [`CommandNotifier`] when enabled and
/// configured, silence otherwise.
pub fn notifier(enabled: bool) -> Box<dyn Notifier> {
    if !enabled {
        return Box::new(SilentNotifier);
    }
    match CommandNotifier::from_env() {
        Some(notifier) => Box::new(notifier),
        None => {
            eprintln!(
                "[WARN] notifications requested but {} is not set",
                NOTIFY_COMMAND_ENV
            );
            Box::new(SilentNotifier)
        }
    }
}
