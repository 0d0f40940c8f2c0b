//! Configuration for stagebuild.
//!
//! Three layers:
//! - [`Settings`]: invocation settings from CLI flags (directories, cores,
//!   forced kernel choices), built once in `main` and passed by reference.
//! - [`GlobalConfig`]: `<config_dir>/config.yml`, with `config.user.yml` from
//!   the current directory shallow-merged on top.
//! - [`ArchConfig`]: the global config with one `archs.<arch>` block merged
//!   over it, which is what builds and templates see.

use anyhow::{Context as _, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::repository::{tarball_name, Compression, Repository, Stage};
use crate::template::Context;

/// Name of the user override file looked up in the current directory.
pub const USER_CONFIG: &str = "config.user.yml";

/// Keys holding version strings. Unquoted, `6.10` would load as the float
/// 6.1, so fractional numbers are refused for these.
const VERSION_KEYS: [&str; 2] = ["kernel", "compiler_isa_level"];

/// Invocation settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding `config.yml` and the template trees.
    pub config_dir: PathBuf,
    /// Where sandboxes and freshly built tarballs live.
    pub build_dir: PathBuf,
    pub cores: usize,
    pub kernel_force_version: Option<String>,
    pub kernel_force_config: Option<String>,
    pub notify: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            build_dir: PathBuf::from("../build-tmp"),
            cores: default_cores(),
            kernel_force_version: None,
            kernel_force_config: None,
            notify: false,
        }
    }
}

fn default_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Settings {
    /// A path inside the config directory.
    pub fn config_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.config_dir.join(rel)
    }

    /// Sandbox root for `arch`.
    pub fn sandbox_root(&self, arch: &str) -> PathBuf {
        self.build_dir.join(arch)
    }

    /// Freshly packed stage tarball waiting to be applied.
    pub fn built_tarball(&self, stage: Stage, arch: &str) -> PathBuf {
        self.build_dir
            .join(tarball_name(stage, arch, Compression::Zst))
    }

    /// Scratch config root used while syncing repositories.
    pub fn sync_root(&self) -> PathBuf {
        self.build_dir.join("tmp")
    }
}

// =============================================================================
// Global configuration
// =============================================================================

/// The parsed top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    values: BTreeMap<String, Value>,
}

impl GlobalConfig {
    /// Load `<config_dir>/config.yml`, merging `config.user.yml` from the
    /// current directory when present.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let user = Path::new(USER_CONFIG);
        Self::load_with_user(&config_dir.join("config.yml"), user.exists().then_some(user))
    }

    pub fn load_with_user(path: &Path, user: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        if let Some(user) = user {
            tracing::debug!("merging user config {}", user.display());
            config.merge(Self::from_file(user)?);
        }
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Ok(Self {
            values: to_string_map(value)?,
        })
    }

    /// Shallow merge: keys in `other` replace ours wholesale.
    pub fn merge(&mut self, other: GlobalConfig) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn repository(&self) -> Result<Repository> {
        match self.get("repository") {
            Some(Value::String(path)) => Ok(Repository::new(path)),
            _ => anyhow::bail!("config key 'repository' must be a path"),
        }
    }

    /// All configured architecture names, sorted.
    pub fn archs(&self) -> Vec<String> {
        match self.get("archs") {
            Some(Value::Mapping(map)) => {
                let mut names: Vec<String> = map
                    .keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect();
                names.sort();
                names
            }
            _ => Vec::new(),
        }
    }

    fn arch_block(&self, arch: &str) -> Option<&Value> {
        match self.get("archs") {
            Some(Value::Mapping(map)) => map.get(arch),
            _ => None,
        }
    }

    /// Expand an architecture selection.
    ///
    /// A group name expands to the group's members, `all` to every
    /// architecture, anything else is split on commas. Every resulting name
    /// must be configured.
    pub fn resolve_archs(&self, selection: &str) -> Result<Vec<String>> {
        let group = match self.get("groups") {
            Some(Value::Mapping(groups)) => groups.get(selection),
            _ => None,
        };

        let names: Vec<String> = if let Some(group) = group {
            string_list(group)
        } else if selection == "all" {
            self.archs()
        } else {
            selection
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        if names.is_empty() {
            return Err(BuildError::Usage(format!("no architectures in '{}'", selection)).into());
        }
        for name in &names {
            if self.arch_block(name).is_none() {
                return Err(BuildError::UnknownArch(name.clone()).into());
            }
        }
        Ok(names)
    }

    /// Merged configuration for one architecture.
    pub fn arch_config(&self, arch: &str, settings: &Settings) -> Result<ArchConfig> {
        let block = self
            .arch_block(arch)
            .ok_or_else(|| BuildError::UnknownArch(arch.to_string()))?;

        let mut values = self.values.clone();
        match block {
            Value::Null => {}
            other => values.extend(
                to_string_map(other.clone())
                    .with_context(|| format!("archs.{} must be a mapping", arch))?,
            ),
        }

        for key in VERSION_KEYS {
            if matches!(values.get(key), Some(Value::Number(n)) if n.is_f64()) {
                anyhow::bail!(
                    "archs.{}: '{}' must be a quoted string (e.g. \"6.10\"), YAML reads unquoted versions as numbers",
                    arch,
                    key
                );
            }
        }

        values.insert("arch".into(), Value::from(arch));
        values.insert("cores".into(), Value::from(settings.cores as u64));
        if let Some(version) = &settings.kernel_force_version {
            values.insert("kernel_force_version".into(), Value::from(version.as_str()));
        }
        if let Some(config) = &settings.kernel_force_config {
            values.insert("kernel_force_config".into(), Value::from(config.as_str()));
        }

        Ok(ArchConfig { values })
    }
}

fn to_string_map(value: Value) -> Result<BTreeMap<String, Value>> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| match k {
                Value::String(k) => Ok((k, v)),
                other => anyhow::bail!("config keys must be strings, got {:?}", other),
            })
            .collect(),
        other => anyhow::bail!("expected a mapping, got {:?}", other),
    }
}

// =============================================================================
// Per-architecture configuration
// =============================================================================

/// Configuration for one architecture: global keys overridden by the
/// architecture's block, plus `arch` and `cores`.
#[derive(Debug, Clone, Default)]
pub struct ArchConfig {
    values: BTreeMap<String, Value>,
}

impl ArchConfig {
    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    /// Scalar value as a string. Integers and booleans are converted.
    /// Versions must be quoted in YAML: `6.10` unquoted is the float 6.1,
    /// which [`GlobalConfig::arch_config`] rejects for the version keys.
    pub fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Absent, null and `false` are false; everything else is true.
    pub fn bool(&self, key: &str) -> bool {
        !matches!(self.get(key), None | Some(Value::Null) | Some(Value::Bool(false)))
    }

    /// Flattened list of strings; a scalar is a one element list.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(string_list).unwrap_or_default()
    }

    /// Package list selected indirectly: `selector` (e.g. `pkgs_stage4`)
    /// names the key that holds the actual list.
    pub fn package_list(&self, selector: &str) -> Vec<String> {
        match self.string(selector) {
            Some(key) => self.string_list(&key),
            None => Vec::new(),
        }
    }

    pub fn arch(&self) -> &str {
        self.get("arch").and_then(Value::as_str).unwrap_or_default()
    }

    /// Template context; `build: true` is added when rendering for a build
    /// step.
    pub fn context(&self, for_build: bool) -> Context {
        let mut ctx = Context::from_map(self.values.clone());
        if for_build {
            ctx.insert("build", true);
        }
        ctx
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items.iter().flat_map(string_list).collect(),
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        _ => Vec::new(),
    }
}
