//! Materialize a template directory into a destination tree.

use anyhow::{Context as _, Result};
use std::fs;
use std::path::Path;

use super::context::Context;
use super::engine::write_file;
use crate::fsutil;

/// Files ending in this suffix are rendered; everything else is copied.
pub const TEMPLATE_SUFFIX: &str = ".tmpl";

/// A template directory containing this entry wipes its destination first.
pub const CLEAN_SENTINEL: &str = ".clean";

/// Render `template` into `dst`.
///
/// A single file is rendered straight to `dst`. A directory is walked in
/// lexicographic order: subdirectories recurse, `*.tmpl` files are rendered
/// with the suffix stripped, other files are copied byte for byte. If the
/// directory holds a `.clean` entry, every existing entry directly under
/// `dst` is removed before anything is written.
///
/// Any I/O error aborts the whole render.
pub fn render_tree(template: &Path, dst: &Path, ctx: &Context) -> Result<()> {
    if template.is_file() {
        return write_file(template, dst, ctx);
    }

    let mut names: Vec<_> = fs::read_dir(template)
        .with_context(|| format!("Failed to read template dir {}", template.display()))?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to list {}", template.display()))?;
    names.sort();

    if names.iter().any(|n| n == CLEAN_SENTINEL) {
        fsutil::clear_dir(dst)?;
    }

    for name in names.iter().filter(|n| *n != CLEAN_SENTINEL) {
        let src = template.join(name);
        fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

        if src.is_dir() {
            render_tree(&src, &dst.join(name), ctx)?;
            continue;
        }

        match name.to_str().and_then(|n| n.strip_suffix(TEMPLATE_SUFFIX)) {
            Some(stripped) if !stripped.is_empty() => {
                write_file(&src, &dst.join(stripped), ctx)?;
            }
            _ => {
                let target = dst.join(name);
                fs::copy(&src, &target).with_context(|| {
                    format!("Failed to copy {} to {}", src.display(), target.display())
                })?;
            }
        }
    }

    Ok(())
}
