use anyhow::{Context, Result};

use crate::backend::VmInventory;
use crate::lease::{ScratchFile, VmLease};
use crate::template::VmTemplate;

/// Write `template` into the scratch file and create the VM from it.
///
/// The returned lease owns the VM from the moment its UUID is known.
pub fn provision<'a>(
    inventory: &'a dyn VmInventory,
    template: &VmTemplate,
    scratch: &ScratchFile,
) -> Result<VmLease<'a>> {
    template.write_to(scratch.path())?;

    let uuid = inventory
        .create(scratch.path())
        .with_context(|| format!("provisioning VM '{}'", template.alias))?;
    tracing::info!(vm = %uuid, alias = %template.alias, "VM created");

    Ok(VmLease::new(inventory, uuid))
}
