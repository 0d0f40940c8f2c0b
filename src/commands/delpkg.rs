//! Delpkg command - drops binary packages from the repository.

use anyhow::Result;

use super::Session;
use stagebuild::BuildError;

pub fn cmd_delpkg(session: &Session, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BuildError::Usage("delpkg needs a package name".to_string()).into());
    }
    session.for_each_builder(|b| b.drop_package(name).map(|_| ()))
}
