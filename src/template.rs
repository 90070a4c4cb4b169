//! VM template handed to `vmadm create`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use uuid::Uuid;

use crate::config::VmConfig;
use crate::request::BuildRequest;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmTemplate {
    pub brand: String,
    pub alias: String,
    pub owner_uuid: Uuid,
    pub ram: u32,
    pub vcpus: u32,
    pub cpu_type: String,
    /// Booting happens explicitly with the ISO attached.
    pub autoboot: bool,
    pub disks: Vec<DiskSpec>,
    pub nics: Vec<NicSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskSpec {
    pub boot: bool,
    pub model: String,
    /// MiB
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NicSpec {
    pub nic_tag: String,
    pub model: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub vlan_id: u16,
    pub network_uuid: Uuid,
    pub primary: bool,
}

impl VmTemplate {
    pub fn from_request(request: &BuildRequest, vm: &VmConfig) -> Self {
        let net = &request.network;
        Self {
            brand: vm.brand.clone(),
            alias: request.name.clone(),
            owner_uuid: request.owner,
            ram: vm.ram_mib,
            vcpus: vm.vcpus,
            cpu_type: vm.cpu_type.clone(),
            autoboot: false,
            disks: vec![DiskSpec {
                boot: true,
                model: vm.disk_model.clone(),
                size: vm.disk_mib,
            }],
            nics: vec![NicSpec {
                nic_tag: vm.nic_tag.clone(),
                model: vm.nic_model.clone(),
                ip: net.ip,
                netmask: net.netmask,
                gateway: net.gateway,
                vlan_id: net.vlan_id,
                network_uuid: net.network_uuid,
                primary: true,
            }],
        }
    }

    /// Size of the boot disk in MiB, as reported in the manifest.
    pub fn disk_size_mib(&self) -> u64 {
        self.disks.iter().find(|d| d.boot).map_or(0, |d| d.size)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("serializing VM template")?;
        fs::write(path, json)
            .with_context(|| format!("writing VM template '{}'", path.display()))
    }
}
