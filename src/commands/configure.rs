//! Configure command - renders the system templates into each sandbox.

use anyhow::Result;

use super::Session;

pub fn cmd_configure(session: &Session) -> Result<()> {
    session.for_each_builder(|b| {
        println!("Configuring {}", b.arch());
        b.configure(true)
    })
}
