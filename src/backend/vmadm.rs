//! `vmadm` adapter for the VM inventory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{VmInventory, VmState, VmSummary, VncEndpoint};
use crate::process::Cmd;

const CREATED_MARKER: &str = "Successfully created VM";

#[derive(Debug, Clone)]
pub struct Vmadm {
    program: String,
}

impl Vmadm {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.program)
    }
}

impl Default for Vmadm {
    fn default() -> Self {
        Self::new("vmadm")
    }
}

#[derive(Debug, Deserialize)]
struct VmGet {
    zonepath: String,
}

#[derive(Debug, Deserialize)]
struct VmInfoVnc {
    vnc: VncRaw,
}

#[derive(Debug, Deserialize)]
struct VncRaw {
    host: String,
    port: u16,
}

impl VmInventory for Vmadm {
    fn list(&self) -> Result<Vec<VmSummary>> {
        let out = self
            .cmd()
            .args(["list", "-p", "-o", "uuid,alias"])
            .run()
            .context("listing VM inventory")?;
        parse_list_output(&out.stdout)
    }

    fn create(&self, template: &Path) -> Result<String> {
        let out = self
            .cmd()
            .arg("create")
            .arg("-f")
            .arg(template)
            .run()
            .with_context(|| format!("creating VM from '{}'", template.display()))?;
        parse_created_uuid(&out.combined())
    }

    fn zone_root(&self, uuid: &str) -> Result<PathBuf> {
        let out = self
            .cmd()
            .args(["get", uuid])
            .run()
            .with_context(|| format!("reading properties of VM {uuid}"))?;
        let vm: VmGet = serde_json::from_str(&out.stdout)
            .with_context(|| format!("parsing `vmadm get` output for VM {uuid}"))?;
        Ok(PathBuf::from(vm.zonepath).join("root"))
    }

    fn boot_from_cdrom(&self, uuid: &str, iso_name: &str) -> Result<()> {
        self.cmd()
            .args(["boot", uuid, "order=cd,once=d"])
            .arg(format!("cdrom=/{iso_name},ide"))
            .run()
            .with_context(|| format!("booting VM {uuid} from {iso_name}"))?;
        Ok(())
    }

    fn vnc(&self, uuid: &str) -> Result<VncEndpoint> {
        let out = self
            .cmd()
            .args(["info", uuid, "vnc"])
            .run()
            .with_context(|| format!("querying VNC info for VM {uuid}"))?;
        parse_vnc_info(&out.stdout)
    }

    fn state(&self, uuid: &str) -> Result<VmState> {
        let out = self
            .cmd()
            .args(["list", "-p", "-o", "state"])
            .arg(format!("uuid={uuid}"))
            .run()
            .with_context(|| format!("querying state of VM {uuid}"))?;
        let raw = out.stdout.trim();
        if raw.is_empty() {
            bail!("VM {uuid} is not in the inventory");
        }
        Ok(VmState::parse(raw))
    }

    fn delete(&self, uuid: &str) -> Result<()> {
        self.cmd()
            .args(["delete", uuid])
            .run()
            .with_context(|| format!("deleting VM {uuid}"))?;
        Ok(())
    }
}

/// Parse `vmadm list -p -o uuid,alias` rows (`uuid:alias`).
fn parse_list_output(stdout: &str) -> Result<Vec<VmSummary>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (uuid, alias) = line
                .split_once(':')
                .with_context(|| format!("unexpected `vmadm list` row: '{line}'"))?;
            Ok(VmSummary {
                uuid: uuid.to_string(),
                alias: alias.to_string(),
            })
        })
        .collect()
}

/// Pull the new VM's UUID out of `vmadm create` output.
fn parse_created_uuid(output: &str) -> Result<String> {
    let token = output
        .lines()
        .find_map(|line| line.split_once(CREATED_MARKER).map(|(_, rest)| rest.trim()))
        .and_then(|rest| rest.split_whitespace().next())
        .with_context(|| {
            format!(
                "`vmadm create` output has no '{CREATED_MARKER}' line: {}",
                output.trim()
            )
        })?;
    let uuid = Uuid::parse_str(token)
        .with_context(|| format!("`vmadm create` reported a malformed UUID '{token}'"))?;
    Ok(uuid.to_string())
}

fn parse_vnc_info(stdout: &str) -> Result<VncEndpoint> {
    let info: VmInfoVnc =
        serde_json::from_str(stdout).context("parsing `vmadm info vnc` output")?;
    Ok(VncEndpoint {
        host: info.vnc.host,
        port: info.vnc.port,
    })
}
