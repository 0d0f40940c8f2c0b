//! Promoting build results into the artifact repository.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::Builder;
use crate::fsutil;
use crate::process::sh_quote;
use crate::repository::{Compression, Stage};

impl Builder<'_> {
    /// Move finished tarballs, binary packages and the genkernel cache into
    /// the repository. Returns whether anything was applied; when nothing
    /// is pending the filesystem is left untouched.
    pub fn apply(&self) -> Result<bool> {
        println!("Applying tarball and binary packages for {}", self.arch);
        let mut applied = false;

        for stage in Stage::ALL {
            let src = self.settings.built_tarball(stage, &self.arch);
            if !src.is_file() {
                continue;
            }
            println!("Copying {} tarball", stage);
            applied = true;

            for compression in Compression::PREFERENCE {
                fsutil::remove_path(&self.repo.release_tarball(&self.arch, stage, compression))?;
            }
            let dst = self
                .repo
                .release_tarball(&self.arch, stage, Compression::Zst);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fsutil::move_file(&src, &dst)?;
        }

        let binpkgs = self.root.join("var/cache/binpkgs");
        if binpkgs.join("Packages").is_file() {
            println!("Copying binpkgs");
            applied = true;
            let dst = self.repo.packages_dir(&self.arch);
            fs::create_dir_all(&dst)
                .with_context(|| format!("Failed to create {}", dst.display()))?;
            self.run(&[
                format!("rsync --delete -a -W {}/ {}", sh_quote(&binpkgs), sh_quote(&dst)),
                reindex_command(&dst),
            ])?;
        }

        if let Some(cache) = self.genkernel_cache() {
            println!("Copying genkernel cache");
            applied = true;
            let dst = self.repo.genkernel_dir(&self.arch);
            fs::create_dir_all(&dst)
                .with_context(|| format!("Failed to create {}", dst.display()))?;
            fsutil::clear_dir(&dst)?;
            fsutil::copy_dir_recursive(&cache, &dst)?;
        }

        println!("{}", if applied { "Done" } else { "Nothing to apply" });
        Ok(applied)
    }

    /// genkernel's cache from the kernel root, falling back to the main
    /// sandbox.
    fn genkernel_cache(&self) -> Option<PathBuf> {
        [self.with_kernel_root().root, self.root.clone()]
            .into_iter()
            .map(|root| root.join("var/cache/genkernel"))
            .find(|cache| cache.is_dir())
    }

    /// Delete every binary package whose name starts with `prefix`, then
    /// reindex the binhost once. `prefix` may include a category, e.g.
    /// `app-editors/vim`.
    pub fn drop_package(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        println!("Dropping binary packages for {}", self.arch);
        let packages = self.repo.packages_dir(&self.arch);
        if !packages.is_dir() {
            println!("- no binary packages for {}", self.arch);
            return Ok(Vec::new());
        }

        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((category, name)) => (packages.join(category), name),
            None => (packages.clone(), prefix),
        };

        let mut removed = Vec::new();
        if dir.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
                .with_context(|| format!("Failed to read {}", dir.display()))?
                .map(|e| e.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            entries.sort();

            for path in entries {
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(name_prefix));
                if !matches {
                    continue;
                }
                let shown = path.strip_prefix(&packages).unwrap_or(&path);
                println!("- removing {}", shown.display());
                fsutil::remove_path(&path)?;
                removed.push(path);
            }
        }

        self.run(&[reindex_command(&packages)])?;
        Ok(removed)
    }
}

fn reindex_command(pkgdir: &std::path::Path) -> String {
    format!("PKGDIR={} emaint binhost --fix", sh_quote(pkgdir))
}
