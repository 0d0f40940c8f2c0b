//! Compare the `-m` target flags gcc enables for different `-march` choices.
//!
//! Useful when picking `kernel_config` and `compiler_isa_level`: only flags
//! whose state differs between the given argument strings are shown.

use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::process;

/// Flag name (without `-m`) to enabled state.
pub type TargetFlags = BTreeMap<String, bool>;

/// Parse `gcc -Q --help=target` output.
pub fn parse_target_flags(output: &str) -> Result<TargetFlags> {
    let re = Regex::new(r"-m([^\s]*)\s+\[(enabled|disabled)\]")?;
    Ok(output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|c| (c[1].to_string(), &c[2] == "enabled"))
        .collect())
}

/// Ask the host gcc which target flags `args` (e.g. `-march=znver3`)
/// turns on.
pub fn query_target_flags(args: &str) -> Result<TargetFlags> {
    let output = process::shell_output(&format!("LC_ALL=C gcc -Q --help=target {}", args))?;
    parse_target_flags(&output)
}

/// Flags whose state is not the same across all `sets`, with each set's
/// state (`None` when a set doesn't know the flag).
pub fn differing_flags(sets: &[TargetFlags]) -> Vec<(String, Vec<Option<bool>>)> {
    let keys: BTreeSet<&String> = sets.iter().flat_map(|s| s.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let states: Vec<Option<bool>> = sets.iter().map(|s| s.get(key).copied()).collect();
            let first = states.first().copied().flatten();
            states
                .iter()
                .any(|s| *s != first)
                .then(|| (key.clone(), states))
        })
        .collect()
}

/// Render the comparison as a right-aligned table.
pub fn render_table(args: &[String], sets: &[TargetFlags]) -> String {
    let headers: Vec<String> = args.iter().map(|a| format!("'{}'", a)).collect();
    let widths: Vec<usize> = headers.iter().map(|h| h.len().max(6)).collect();

    let mut out = format!("{:>40} ", "archs: ");
    out.push_str(&join_cells(headers.iter().map(String::as_str), &widths));
    out.push('\n');

    for (flag, states) in differing_flags(sets) {
        out.push_str(&format!("{:>40} ", format!("-m{}", flag)));
        let cells = states.iter().map(|s| match s {
            Some(true) => "true",
            Some(false) => "false",
            None => "",
        });
        out.push_str(&join_cells(cells, &widths));
        out.push('\n');
    }
    out
}

fn join_cells<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" ")
}
