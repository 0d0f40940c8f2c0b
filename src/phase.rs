//! Build phases and phase-set expansion.
//!
//! Phases are requested as a set; the order they run in is fixed by
//! [`crate::builder::Builder::build`], never by set iteration order.

use anyhow::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Init,
    /// Shorthand for `Stage3Build` + `Stage3Pack`.
    Stage3,
    Stage3Build,
    Stage3Pack,
    /// Version gate: enqueues `KernelInit` + `KernelBuild` when the cached
    /// kernel is stale.
    Kernel,
    KernelInit,
    KernelBuild,
    /// Shorthand for `Stage4Build` + `Stage4Pack`.
    Stage4,
    Stage4Build,
    Stage4Pack,
    Binpkgs,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Init,
        Phase::Stage3,
        Phase::Stage3Build,
        Phase::Stage3Pack,
        Phase::Kernel,
        Phase::KernelInit,
        Phase::KernelBuild,
        Phase::Stage4,
        Phase::Stage4Build,
        Phase::Stage4Pack,
        Phase::Binpkgs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Stage3 => "stage3",
            Phase::Stage3Build => "stage3_build",
            Phase::Stage3Pack => "stage3_pack",
            Phase::Kernel => "kernel",
            Phase::KernelInit => "kernel_init",
            Phase::KernelBuild => "kernel_build",
            Phase::Stage4 => "stage4",
            Phase::Stage4Build => "stage4_build",
            Phase::Stage4Pack => "stage4_pack",
            Phase::Binpkgs => "binpkgs",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| BuildError::Usage(format!("unknown phase: {}", s)))
    }
}

/// A requested set of phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSet(BTreeSet<Phase>);

impl Default for PhaseSet {
    /// `init, stage3, kernel, stage4, binpkgs`
    fn default() -> Self {
        Self::from_iter([
            Phase::Init,
            Phase::Stage3,
            Phase::Kernel,
            Phase::Stage4,
            Phase::Binpkgs,
        ])
    }
}

impl FromIterator<Phase> for PhaseSet {
    fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl PhaseSet {
    /// Parse a comma separated phase list such as `init,stage3_build`.
    pub fn parse(list: &str) -> Result<Self> {
        let mut set = BTreeSet::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            set.insert(name.parse::<Phase>()?);
        }
        if set.is_empty() {
            return Err(BuildError::Usage("empty phase list".to_string()).into());
        }
        Ok(Self(set))
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.0.contains(&phase)
    }

    pub fn insert(&mut self, phase: Phase) {
        self.0.insert(phase);
    }

    pub fn stage3_build(&self) -> bool {
        self.contains(Phase::Stage3) || self.contains(Phase::Stage3Build)
    }

    pub fn stage3_pack(&self) -> bool {
        self.contains(Phase::Stage3) || self.contains(Phase::Stage3Pack)
    }

    pub fn stage4_build(&self) -> bool {
        self.contains(Phase::Stage4) || self.contains(Phase::Stage4Build)
    }

    pub fn stage4_pack(&self) -> bool {
        self.contains(Phase::Stage4) || self.contains(Phase::Stage4Pack)
    }

    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for PhaseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.0.iter().map(|p| p.name()).collect();
        f.write_str(&names.join(","))
    }
}
