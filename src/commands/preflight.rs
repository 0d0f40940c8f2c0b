//! Preflight command - runs preflight checks.

use anyhow::Result;

use super::Session;
use stagebuild::preflight;

pub fn cmd_preflight(session: &Session, strict: bool) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(&session.global, &session.settings)?;
    } else {
        let report = preflight::run_preflight(&session.global, &session.settings);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail with a non-zero exit.");
        }
    }
    Ok(())
}
