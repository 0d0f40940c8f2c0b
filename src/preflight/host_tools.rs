//! Host tool availability checks.

use super::types::CheckResult;

/// Tools the host side of a build shells out to, with the package that
/// provides them.
const REQUIRED_TOOLS: [(&str, &str, &str); 8] = [
    ("tar", "app-arch/tar", "packs and unpacks stage tarballs"),
    ("zstd", "app-arch/zstd", "compresses stage tarballs"),
    ("xz", "app-arch/xz-utils", "unpacks xz stage3 and packs kernels"),
    ("bzip2", "app-arch/bzip2", "unpacks bz2 stage3 tarballs"),
    ("rsync", "net-misc/rsync", "moves binary packages"),
    ("cp", "sys-apps/coreutils", "clones the kernel sandbox"),
    ("mount", "sys-apps/util-linux", "inspects sandbox mounts"),
    ("umount", "sys-apps/util-linux", "manual sandbox cleanup"),
];

const OPTIONAL_TOOLS: [(&str, &str, &str); 2] = [
    ("emaint", "sys-apps/portage", "reindexes the binary package host"),
    ("gcc", "sys-devel/gcc", "needed by `stagebuild gcc-compare`"),
];

pub fn check_host_tools() -> Vec<CheckResult> {
    let required = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, true));
    let optional = OPTIONAL_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, false));
    required.chain(optional).collect()
}

/// Check that `tool` is on PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        Err(_) => {
            let msg = format!("Not found. Install '{}' ({})", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
