//! Filesystem helpers shared by the builder, sync and template code.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;
use walkdir::WalkDir;

/// Copy the tree under `src` into `dst`, preserving symlinks.
///
/// `dst` is created if needed; existing files are overwritten.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            replace_symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Remove every entry directly under `dir`, keeping `dir` itself. A missing
/// `dir` is fine.
pub fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
    };
    for entry in entries {
        remove_path(&entry?.path())?;
    }
    Ok(())
}

/// Remove a file, symlink or directory tree.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match path.symlink_metadata() {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

/// Point `link` at `target`, replacing whatever is there (`ln -sf`).
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link).with_context(|| format!("Failed to remove {}", link.display()))?;
    }
    symlink(target, link)
        .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))
}

/// Move a file, falling back to copy and delete across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive_keeps_symlinks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/file"), "data").unwrap();
        symlink("a/b/file", src.join("link")).unwrap();

        let dst = dir.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a/b/file")).unwrap(), "data");
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), Path::new("a/b/file"));
    }

    #[test]
    fn test_clear_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        fs::write(dir.path().join("file"), "").unwrap();
        symlink("/nonexistent", dir.path().join("dangling")).unwrap();

        clear_dir(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        clear_dir(&dir.path().join("missing")).unwrap();
    }

    #[test]
    fn test_replace_symlink() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("make.profile");
        replace_symlink(Path::new("old"), &link).unwrap();
        replace_symlink(Path::new("new"), &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("new"));
    }
}
