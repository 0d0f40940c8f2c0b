//! Gcc-compare command - prints target flags that differ between `-march`
//! choices.

use anyhow::Result;

use stagebuild::gcc_compare::{query_target_flags, render_table};

pub fn cmd_gcc_compare(args: &[String]) -> Result<()> {
    let sets = args
        .iter()
        .map(|a| query_target_flags(a))
        .collect::<Result<Vec<_>>>()?;
    print!("{}", render_table(args, &sets));
    Ok(())
}
