//! Preflight checks run before a build touches anything.
//!
//! - [`check_host_tools`] validates that `vmadm`, `zfs` and the manifest
//!   tool are installed, so a build doesn't die halfway with a cryptic error.
//! - [`guard`] removes stale VMs that carry the image name.
//!
//! # Example
//!
//! ```rust
//! use vm_image_builder::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("vmadm") {
//!     println!("not a SmartOS host");
//! }
//!
//! let tools = &[("zfs", "zfs"), ("imgmanifest", "smartos-image-tools")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

pub mod guard;

use anyhow::{bail, Result};

use crate::config::ToolsConfig;

pub use guard::{
    remove_stale_vms, resolve_lookup_failure, LookupFailurePolicy, PreflightError,
    PreflightOutcome,
};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command_name, package_name). Every missing tool is
/// reported, not just the first.
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

/// Check the configured host commands.
pub fn check_host_tools(tools: &ToolsConfig) -> Result<()> {
    check_required_tools(&[
        (tools.vmadm.as_str(), "smartos-live (vmadm)"),
        (tools.zfs.as_str(), "zfs"),
        (tools.manifest.as_str(), "smartos image tools"),
    ])
}
