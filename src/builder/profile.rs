//! Keeping the sandbox's `make.profile` link on the configured profile.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use super::Builder;
use crate::error::BuildError;
use crate::fsutil::replace_symlink;

/// Base of the profile link as seen from `/etc/portage`.
pub const CANONICAL_BASE: &str = "../../var/db/repos/gentoo";

/// Desktop flavours stage3 tarballs ship that map onto a configured profile.
const DESKTOP_SUFFIXES: [&str; 3] = ["/desktop", "/desktop/plasma", "/desktop/gnome"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileState {
    Correct,
    /// Right profile, link base points somewhere else.
    WrongBase,
    /// The tarball uses the plain variant of a configured desktop profile.
    DesktopVariant,
    WrongProfile,
}

/// Split a profile link target into `(base, profile)` around `/profiles/`.
pub fn split_profile_link(target: &str) -> Option<(String, String)> {
    let re = Regex::new(r"^(.*)/profiles/(.*)$").ok()?;
    let caps = re.captures(target)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

pub fn classify_profile(base: &str, profile: &str, wanted: &str) -> ProfileState {
    if profile == wanted {
        if base == CANONICAL_BASE {
            ProfileState::Correct
        } else {
            ProfileState::WrongBase
        }
    } else if DESKTOP_SUFFIXES
        .iter()
        .any(|suffix| format!("{}{}", profile, suffix) == wanted)
    {
        ProfileState::DesktopVariant
    } else {
        ProfileState::WrongProfile
    }
}

fn profile_target(base: &str, profile: &str) -> PathBuf {
    PathBuf::from(format!("{}/profiles/{}", base, profile))
}

impl Builder<'_> {
    fn profile_link(&self) -> PathBuf {
        self.root.join("etc/portage/make.profile")
    }

    fn read_profile(&self, link: &Path) -> Result<(String, String)> {
        let target = fs::read_link(link)
            .with_context(|| format!("Failed to read profile link {}", link.display()))?;
        let target = target.to_string_lossy().into_owned();
        split_profile_link(&target).ok_or_else(|| {
            BuildError::MalformedProfile {
                link: link.to_path_buf(),
                target,
            }
            .into()
        })
    }

    /// Bring the profile link in line with the configured `profile`.
    pub(super) fn check_profile(&self) -> Result<()> {
        let Some(wanted) = self.cfg.string("profile") else {
            eprintln!("  [WARN] no profile configured for {}", self.arch);
            return Ok(());
        };
        let link = self.profile_link();
        let (mut base, mut profile) = self.read_profile(&link)?;

        if classify_profile(&base, &profile, &wanted) == ProfileState::DesktopVariant {
            println!("Switching profile {} to {}", profile, wanted);
            replace_symlink(&profile_target(CANONICAL_BASE, &wanted), &link)?;
            (base, profile) = self.read_profile(&link)?;
        }

        match classify_profile(&base, &profile, &wanted) {
            ProfileState::Correct => Ok(()),
            ProfileState::WrongBase => {
                println!("Fixing profile path from {} to {}", base, CANONICAL_BASE);
                replace_symlink(&profile_target(CANONICAL_BASE, &profile), &link)
            }
            ProfileState::WrongProfile | ProfileState::DesktopVariant => {
                self.migrate_profile(&profile, &wanted)
            }
        }
    }

    /// Move the sandbox to `wanted` through its split-usr variant and the
    /// merge-usr helper, then rebuild the toolchain under the new profile.
    fn migrate_profile(&self, current: &str, wanted: &str) -> Result<()> {
        println!("Migrating profile from {} to {}", current, wanted);
        let split_usr = format!("{}/split-usr", wanted);
        replace_symlink(&profile_target(CANONICAL_BASE, &split_usr), &self.profile_link())?;

        self.mounted(|| {
            self.chrun(
                &[
                    "emerge --sync".to_string(),
                    "emerge -q1 sys-apps/merge-usr".to_string(),
                    "merge-usr".to_string(),
                    format!("eselect profile set {}", wanted),
                    "emerge -q1 sys-devel/binutils sys-devel/gcc sys-libs/glibc".to_string(),
                    "emerge -q1 dev-build/libtool".to_string(),
                ],
                "/",
            )
        })
    }
}
