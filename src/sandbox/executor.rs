//! Run work inside a chroot in a forked child and ship the result back.
//!
//! The child chroots, changes directory, runs its work, writes a JSON
//! encoded [`ChildOutcome`] to a pipe and leaves through `_exit`, so no
//! destructor or atexit hook inherited from the parent ever runs twice.
//!
//! Success is decided by the child's exit status, not by whether it wrote
//! anything: an empty string or `false` is a perfectly good result.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, chroot, fork, ForkResult, Pid};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use super::mounts::reset_signal_handlers;
use crate::error::BuildError;
use crate::process;

/// What the child reports back over the pipe.
#[derive(Debug, Serialize, Deserialize)]
pub enum ChildOutcome<T> {
    Ok(T),
    Err(String),
}

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    Signal(i32),
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildExit::Code(code) => write!(f, "exit code {}", code),
            ChildExit::Signal(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// Turn the child's exit state and payload into the caller's result.
pub fn decode_outcome<T: DeserializeOwned>(exit: ChildExit, payload: &[u8]) -> Result<T> {
    let outcome: Option<ChildOutcome<T>> = if payload.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(payload).context("Failed to decode sandbox child result")?)
    };

    match (exit, outcome) {
        (ChildExit::Code(0), Some(ChildOutcome::Ok(value))) => Ok(value),
        (ChildExit::Code(0), None) => Err(BuildError::ChildProtocol.into()),
        (exit, Some(ChildOutcome::Err(message))) => Err(BuildError::ChildFailed {
            status: exit.to_string(),
            message,
        }
        .into()),
        (exit, _) => Err(BuildError::ChildFailed {
            status: exit.to_string(),
            message: "no error reported".to_string(),
        }
        .into()),
    }
}

/// Run `work` in a forked child and return its result.
pub fn run_isolated<T, F>(work: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    let (read_end, write_end) = nix::unistd::pipe().context("Failed to create result pipe")?;

    // SAFETY: the process is single threaded while building, and the child
    // only runs the closure, writes to the pipe and calls _exit.
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Child => {
            drop(read_end);
            reset_signal_handlers();

            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(value)) => ChildOutcome::Ok(value),
                Ok(Err(e)) => ChildOutcome::Err(format!("{:#}", e)),
                Err(_) => ChildOutcome::Err("sandbox child panicked".to_string()),
            };
            let code = match outcome {
                ChildOutcome::Ok(_) => 0,
                ChildOutcome::Err(_) => 1,
            };

            let mut pipe = File::from(write_end);
            let written = serde_json::to_writer(&mut pipe, &outcome)
                .map_err(std::io::Error::from)
                .and_then(|()| pipe.flush());
            let code = if written.is_err() { 2 } else { code };
            drop(pipe);
            // SAFETY: _exit only terminates the process.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            drop(write_end);

            let mut payload = Vec::new();
            let read = File::from(read_end).read_to_end(&mut payload);
            let exit = wait_for(child)?;
            read.context("Failed to read sandbox child result")?;

            tracing::debug!("sandbox child {} finished: {}", child, exit);
            decode_outcome(exit, &payload)
        }
    }
}

fn wait_for(child: Pid) -> Result<ChildExit> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Code(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ChildExit::Signal(sig as i32)),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("waitpid on sandbox child failed"),
        }
    }
}

/// Run `work` with `root` as filesystem root and `workdir` as current
/// directory, in an isolated child.
pub fn run_in_sandbox<T, F>(root: &Path, workdir: &str, work: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    run_isolated(|| {
        chroot(root).with_context(|| format!("chroot to {} failed", root.display()))?;
        chdir(workdir).with_context(|| format!("chdir to {} failed", workdir))?;
        work()
    })
}

/// Run shell commands in the sandbox, failing fast on the first non-zero
/// exit.
pub fn chroot_commands(root: &Path, workdir: &str, commands: &[String]) -> Result<()> {
    run_in_sandbox(root, workdir, || {
        process::run_command_list(commands)?;
        Ok(true)
    })
    .map(|_: bool| ())
}

/// Run one shell command in the sandbox and return its stdout.
pub fn chroot_output(root: &Path, workdir: &str, command: &str) -> Result<String> {
    run_in_sandbox(root, workdir, || process::shell_output(command))
}

/// Run an interactive program in the sandbox with the terminal attached.
pub fn chroot_interactive(root: &Path, workdir: &str, program: &str) -> Result<()> {
    run_in_sandbox(root, workdir, || {
        process::Cmd::new(program).allow_fail().run_interactive()?;
        Ok(true)
    })
    .map(|_: bool| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn payload<T: Serialize>(outcome: &ChildOutcome<T>) -> Vec<u8> {
        serde_json::to_vec(outcome).unwrap()
    }

    #[test]
    fn test_decode_success() {
        let bytes = payload(&ChildOutcome::Ok("6.8.0".to_string()));
        let value: String = decode_outcome(ChildExit::Code(0), &bytes).unwrap();
        assert_eq!(value, "6.8.0");
    }

    #[test]
    fn test_decode_empty_and_false_results_are_values() {
        let bytes = payload(&ChildOutcome::Ok(String::new()));
        let value: String = decode_outcome(ChildExit::Code(0), &bytes).unwrap();
        assert_eq!(value, "");

        let bytes = payload(&ChildOutcome::Ok(false));
        assert!(!decode_outcome::<bool>(ChildExit::Code(0), &bytes).unwrap());
    }

    #[test]
    fn test_decode_clean_exit_without_payload() {
        let err = decode_outcome::<bool>(ChildExit::Code(0), b"").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ChildProtocol)
        ));
    }

    #[test]
    fn test_decode_crash_uses_exit_status() {
        let err = decode_outcome::<bool>(ChildExit::Signal(9), b"").unwrap_err();
        assert!(err.to_string().contains("signal 9"));

        let bytes = payload::<bool>(&ChildOutcome::Err("emerge failed".into()));
        let err = decode_outcome::<bool>(ChildExit::Code(1), &bytes).unwrap_err();
        assert!(err.to_string().contains("emerge failed"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    #[serial]
    fn test_isolated_returns_value() {
        let value: u32 = run_isolated(|| Ok(6 * 7)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    #[serial]
    fn test_isolated_propagates_error() {
        let err = run_isolated::<bool, _>(|| anyhow::bail!("no kernel sources")).unwrap_err();
        assert!(err.to_string().contains("no kernel sources"));
    }

    #[test]
    #[serial]
    fn test_isolated_child_state_does_not_leak() {
        let mut counter = 0;
        let seen: i32 = run_isolated(|| {
            counter += 1;
            Ok(counter)
        })
        .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(counter, 0);
    }
}
