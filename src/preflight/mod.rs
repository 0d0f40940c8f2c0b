//! Preflight checks.
//!
//! Verifies host tools, privileges, configuration and emulators before a
//! build. Run with `stagebuild preflight`.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::{GlobalConfig, Settings};

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(global: &GlobalConfig, settings: &Settings) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    println!("Checking privileges...");
    checks.push(environment::check_root());

    println!("Checking configuration...");
    checks.extend(environment::check_config(global, settings));
    checks.extend(environment::check_emulators(global, settings));

    println!();
    PreflightReport { checks }
}

/// Run preflight and bail if any check fails.
pub fn run_preflight_or_fail(global: &GlobalConfig, settings: &Settings) -> Result<()> {
    let report = run_preflight(global, settings);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
