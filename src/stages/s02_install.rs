use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::VmInventory;

/// Copy the ISO into the VM's filesystem root and boot once from it.
///
/// Does not wait for the installer; see [`super::s04_poll`]. Returns the
/// host path of the copied ISO.
pub fn install(inventory: &dyn VmInventory, uuid: &str, iso: &Path) -> Result<PathBuf> {
    let iso_name = iso
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("ISO path has no file name: {}", iso.display()))?;

    let zone_root = inventory.zone_root(uuid)?;
    let dest = zone_root.join(iso_name);
    let bytes = fs::copy(iso, &dest).with_context(|| {
        format!(
            "copying ISO '{}' into VM root '{}'",
            iso.display(),
            dest.display()
        )
    })?;
    tracing::debug!(vm = uuid, bytes, dest = %dest.display(), "ISO copied");

    inventory.boot_from_cdrom(uuid, iso_name)?;
    Ok(dest)
}
