//! Host tool checks.
//!
//! The host-tool inspector shells out to binutils and gdb. Checking for them
//! up front turns a confusing mid-run failure into a list of what to install.

use anyhow::{bail, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools the host-tool inspector cannot work without.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("file", "file"), ("readelf", "binutils")];

/// Shared-object listers; at least one must be present. gdb is preferred.
pub const LIBRARY_LISTERS: &[(&str, &str)] = &[("gdb", "gdb"), ("ldd", "libc-bin")];

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and the package providing it.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check everything the host-tool inspector needs.
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)?;
    if !LIBRARY_LISTERS.iter().any(|(tool, _)| command_exists(tool)) {
        let msg = LIBRARY_LISTERS
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Need at least one of:\n{}", msg);
    }
    Ok(())
}
