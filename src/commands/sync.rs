//! Sync command - updates the package metadata trees.

use anyhow::Result;

use super::Session;
use stagebuild::host::SystemHost;
use stagebuild::sync::sync_repos;

pub fn cmd_sync(session: &Session, repos: &[String]) -> Result<()> {
    let repo = session.global.repository()?;
    sync_repos(&session.settings, &repo, &SystemHost, repos)
}
