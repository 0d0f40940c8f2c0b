//! Build and apply commands.

use anyhow::{bail, Result};

use super::Session;
use stagebuild::phase::PhaseSet;

/// Build every selected architecture.
///
/// A failing architecture does not stop the others; the command fails at
/// the end if any did. With `apply`, only the successful ones are applied.
pub fn cmd_build(session: &Session, phases: &PhaseSet, apply: bool) -> Result<()> {
    let mut built = Vec::new();
    let mut failed = Vec::new();

    for arch in session.archs()? {
        println!("Building {}", arch);
        let result = session.builder(&arch).and_then(|b| b.build(phases));
        match result {
            Ok(()) => built.push(arch),
            Err(e) => {
                eprintln!("Error building {}: {:#}", arch, e);
                failed.push(arch);
            }
        }
    }

    if apply {
        for arch in &built {
            session.builder(arch)?.apply()?;
        }
    }

    if !failed.is_empty() {
        bail!("build failed for: {}", failed.join(", "));
    }
    Ok(())
}

/// Apply previously built artifacts for every selected architecture.
pub fn cmd_apply(session: &Session) -> Result<()> {
    session.for_each_builder(|b| b.apply().map(|_| ()))
}
