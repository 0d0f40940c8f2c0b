//! Typed build failures.
//!
//! Everything else travels as `anyhow::Error`; these variants exist so callers
//! (and tests) can tell configuration problems from command failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no arch found: {0}")]
    UnknownArch(String),

    #[error("malformed profile link {link}: {target}")]
    MalformedProfile { link: PathBuf, target: String },

    #[error("can't parse kernel version from: {0:?}")]
    VersionParse(String),

    #[error("kernel version mismatch: requested {requested}, installed {installed}")]
    VersionMismatch { requested: String, installed: String },

    #[error("error running command: {command} (exit code {code})")]
    CommandFailed { command: String, code: i32 },

    #[error("no stage3 tarball found in {0}")]
    MissingTarball(PathBuf),

    #[error("qemu user not found: {0}")]
    MissingEmulator(PathBuf),

    #[error("sandbox child failed ({status}): {message}")]
    ChildFailed { status: String, message: String },

    #[error("sandbox child exited cleanly without a result")]
    ChildProtocol,

    #[error("usage: {0}")]
    Usage(String),
}
