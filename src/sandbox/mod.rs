//! Isolated execution inside a sandbox root.
//!
//! [`mounts`] manages the pseudo filesystems a working chroot needs and makes
//! sure they are released on every exit path. [`executor`] forks a child
//! that chroots into the sandbox, runs its work and reports a typed result
//! back over a pipe.

pub mod executor;
pub mod mounts;

pub use executor::{
    chroot_commands, chroot_interactive, chroot_output, run_in_sandbox, run_isolated, ChildExit,
    ChildOutcome,
};
pub use mounts::{
    cleanup, install_signal_teardown, mount_pseudo_fs, mounts_under, unmount_pseudo_fs,
    with_mounts, MountScope, PSEUDO_FS,
};
