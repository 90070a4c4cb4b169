use crate::backend::{VmInventory, VncEndpoint};

/// Print where the operator can reach the installer console.
///
/// Informational only: a failed query is a warning, never an error.
pub fn report_console(inventory: &dyn VmInventory, uuid: &str) -> Option<VncEndpoint> {
    match inventory.vnc(uuid) {
        Ok(vnc) => {
            println!("  VNC console: {}", vnc);
            println!("  Connect with a VNC client and complete the installation.");
            println!("  The build continues once the VM powers off.");
            Some(vnc)
        }
        Err(e) => {
            eprintln!("  [WARN] Could not read VNC info for VM {}: {:#}", uuid, e);
            None
        }
    }
}
