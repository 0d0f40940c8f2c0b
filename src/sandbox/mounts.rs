//! Pseudo-filesystem mounts for a chroot, with guaranteed teardown.
//!
//! `proc` is mounted fresh; the host's `/dev` and `/sys` are recursively
//! bind-mounted and marked slave so unmount events inside the sandbox do
//! not propagate back to the host.

use anyhow::{Context, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::host::Host;

/// Subdirectories of the sandbox root that get mounted, in teardown order.
pub const PSEUDO_FS: [&str; 3] = ["sys", "proc", "dev"];

/// Mount `proc`, `dev` and `sys` under `root`.
///
/// On failure anything already mounted is torn down again.
pub fn mount_pseudo_fs(root: &Path) -> Result<()> {
    tracing::info!("mounting pseudo filesystems under {}", root.display());
    register_teardown(root);

    let result = (|| -> Result<()> {
        let proc_dir = root.join("proc");
        mount(
            Some("proc"),
            &proc_dir,
            Some("proc"),
            MsFlags::empty(),
            None::<&str>,
        )
        .with_context(|| format!("Failed to mount proc on {}", proc_dir.display()))?;

        for dir in ["dev", "sys"] {
            let source = Path::new("/").join(dir);
            let target = root.join(dir);
            mount(
                Some(&source),
                &target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            )
            .with_context(|| format!("Failed to bind {} on {}", source.display(), target.display()))?;
            mount(
                None::<&str>,
                &target,
                None::<&str>,
                MsFlags::MS_SLAVE | MsFlags::MS_REC,
                None::<&str>,
            )
            .with_context(|| format!("Failed to make {} rslave", target.display()))?;
        }
        Ok(())
    })();

    if result.is_err() {
        unmount_pseudo_fs(root);
    }
    result
}

/// Lazily detach whatever is mounted on `root/{sys,proc,dev}`.
///
/// Never fails: a busy mount is detached and released once its last user
/// goes away, and errors are only logged.
pub fn unmount_pseudo_fs(root: &Path) {
    for dir in PSEUDO_FS {
        let target = root.join(dir);
        if !is_mount_point(&target) {
            continue;
        }
        match umount2(&target, MntFlags::MNT_DETACH) {
            Ok(()) => tracing::info!("unmounted {}", target.display()),
            Err(e) => tracing::warn!("failed to unmount {}: {}", target.display(), e),
        }
    }
    clear_teardown();
}

/// Unmount (if mounted) and delete the sandbox root. Idempotent.
pub fn cleanup(host: &dyn Host, root: &Path) -> Result<()> {
    host.unmount(root);
    if root.symlink_metadata().is_ok() {
        fs::remove_dir_all(root).with_context(|| format!("Failed to remove {}", root.display()))?;
    }
    Ok(())
}

/// Mount points at or below `root`, read from `/proc/self/mountinfo`.
pub fn mounts_under(root: &Path) -> Vec<PathBuf> {
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let Ok(info) = fs::read_to_string("/proc/self/mountinfo") else {
        return Vec::new();
    };
    parse_mountinfo(&info)
        .into_iter()
        .filter(|p| p.starts_with(&root))
        .collect()
}

fn is_mount_point(path: &Path) -> bool {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    fs::read_to_string("/proc/self/mountinfo")
        .map(|info| parse_mountinfo(&info).contains(&path))
        .unwrap_or(false)
}

/// Extract mount points (field 5) from mountinfo text, undoing the octal
/// escapes the kernel applies to spaces and friends.
fn parse_mountinfo(info: &str) -> Vec<PathBuf> {
    info.lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes.get(i + 1..i + 4).filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)));
        match escape {
            Some(digits) if bytes[i] == b'\\' => {
                let code = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(code as u8);
                i += 4;
            }
            _ => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// =============================================================================
// Signal teardown
// =============================================================================

/// Mount targets of the active scope as NUL-terminated strings, read by the
/// signal handler. Null when nothing is mounted.
static TEARDOWN: AtomicPtr<Vec<CString>> = AtomicPtr::new(std::ptr::null_mut());

fn register_teardown(root: &Path) {
    let targets: Vec<CString> = PSEUDO_FS
        .iter()
        .filter_map(|dir| CString::new(root.join(dir).as_os_str().as_bytes()).ok())
        .collect();
    let previous = TEARDOWN.swap(Box::into_raw(Box::new(targets)), Ordering::SeqCst);
    if !previous.is_null() {
        // SAFETY: the pointer came from Box::into_raw in this module and was
        // swapped out, so nothing else can reach it.
        drop(unsafe { Box::from_raw(previous) });
    }
}

fn clear_teardown() {
    let previous = TEARDOWN.swap(std::ptr::null_mut(), Ordering::SeqCst);
    if !previous.is_null() {
        // SAFETY: see register_teardown.
        drop(unsafe { Box::from_raw(previous) });
    }
}

extern "C" fn teardown_on_signal(sig: libc::c_int) {
    // Only async-signal-safe calls here: umount2, write and _exit.
    let targets = TEARDOWN.swap(std::ptr::null_mut(), Ordering::SeqCst);
    if !targets.is_null() {
        // SAFETY: swapped out of TEARDOWN, so this handler owns it. It is
        // leaked rather than freed since we are about to _exit.
        let targets = unsafe { &*targets };
        for target in targets {
            unsafe {
                libc::umount2(target.as_ptr(), libc::MNT_DETACH);
            }
        }
    }
    let msg = b"stagebuild: signal received, sandbox unmounted\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(128 + sig);
    }
}

/// Install SIGINT/SIGTERM handlers that detach the active sandbox mounts
/// before exiting.
pub fn install_signal_teardown() -> Result<()> {
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs async-signal-safe operations.
        unsafe { signal(sig, SigHandler::Handler(teardown_on_signal)) }
            .with_context(|| format!("Failed to install {:?} handler", sig))?;
    }
    Ok(())
}

/// Restore default signal dispositions; used in forked sandbox children so
/// they never run the parent's teardown.
pub fn reset_signal_handlers() {
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: restoring the default disposition is always sound.
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }
}

// =============================================================================
// Scoped mounts
// =============================================================================

/// RAII guard for an active set of sandbox mounts.
///
/// Dropping the guard unmounts, whether the scope ended normally, through
/// `?`, or by unwinding.
pub struct MountScope<'h> {
    host: &'h dyn Host,
    root: PathBuf,
}

impl<'h> MountScope<'h> {
    pub fn enter(host: &'h dyn Host, root: &Path) -> Result<Self> {
        host.mount(root)?;
        Ok(Self {
            host,
            root: root.to_path_buf(),
        })
    }
}

impl Drop for MountScope<'_> {
    fn drop(&mut self) {
        self.host.unmount(&self.root);
    }
}

/// Run `body` with the sandbox pseudo filesystems mounted.
pub fn with_mounts<T>(host: &dyn Host, root: &Path, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let _scope = MountScope::enter(host, root)?;
    body()
}
