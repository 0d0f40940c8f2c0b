//! Sandbox tests that touch the real kernel.
//!
//! Mounting needs root, so those tests are ignored by default:
//! `sudo -E cargo test --test sandbox_tests -- --ignored`

use std::fs;
use tempfile::TempDir;

use serial_test::serial;
use stagebuild::host::{Host, SystemHost};
use stagebuild::sandbox::{self, mounts_under, PSEUDO_FS};

#[test]
#[ignore]
#[serial]
fn test_mounts_are_released_after_scope() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("amd64");
    for fs_name in PSEUDO_FS {
        fs::create_dir_all(root.join(fs_name)).unwrap();
    }
    let host = SystemHost;

    let mounted = sandbox::with_mounts(&host, &root, || Ok(mounts_under(&root).len())).unwrap();
    assert!(mounted >= PSEUDO_FS.len());
    assert!(mounts_under(&root).is_empty());

    let failed: anyhow::Result<()> =
        sandbox::with_mounts(&host, &root, || anyhow::bail!("step failed"));
    assert!(failed.is_err());
    assert!(mounts_under(&root).is_empty());
}

#[test]
#[ignore]
#[serial]
fn test_cleanup_unmounts_before_removing() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("amd64");
    for fs_name in PSEUDO_FS {
        fs::create_dir_all(root.join(fs_name)).unwrap();
    }
    let host = SystemHost;
    host.mount(&root).unwrap();

    sandbox::cleanup(&host, &root).unwrap();
    assert!(!root.exists());
    assert!(mounts_under(dir.path()).is_empty());
}

#[test]
#[serial]
fn test_cleanup_of_missing_root() {
    let dir = TempDir::new().unwrap();
    sandbox::cleanup(&SystemHost, &dir.path().join("never-created")).unwrap();
}
