//! Shell command - interactive shell in one sandbox.

use anyhow::Result;

use super::Session;
use stagebuild::BuildError;

/// `target` is empty for the main sandbox, or `kernel` (also `t`, `true`)
/// for the kernel sandbox.
pub fn parse_shell_target(target: Option<&str>) -> Result<bool> {
    match target {
        None => Ok(false),
        Some("kernel" | "t" | "true") => Ok(true),
        Some(other) => Err(BuildError::Usage(format!(
            "unknown shell target '{}', expected 'kernel'",
            other
        ))
        .into()),
    }
}

pub fn cmd_shell(session: &Session, target: Option<&str>) -> Result<()> {
    let kernel = parse_shell_target(target)?;
    let archs = session.archs()?;
    let [arch] = archs.as_slice() else {
        return Err(BuildError::Usage("only one arch allowed".to_string()).into());
    };
    session.builder(arch)?.shell(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shell_target() {
        assert!(!parse_shell_target(None).unwrap());
        assert!(parse_shell_target(Some("kernel")).unwrap());
        assert!(parse_shell_target(Some("t")).unwrap());
        assert!(parse_shell_target(Some("stage")).is_err());
    }
}
