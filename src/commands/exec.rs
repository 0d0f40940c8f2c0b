//! Exec command - runs a command inside each sandbox.

use anyhow::Result;

use super::Session;

pub fn cmd_exec(session: &Session, command: &[String]) -> Result<()> {
    let command = command.join(" ");
    session.for_each_builder(|b| b.exec_command(&command))
}
