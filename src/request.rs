//! Build request: the validated parameters for one image build.

use anyhow::{bail, Context, Result};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use uuid::Uuid;

/// Highest 802.1Q VLAN id accepted by the NIC template.
pub const MAX_VLAN_ID: u16 = 4094;

/// Raw, unvalidated parameters as they arrive from the command line.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub iso: PathBuf,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub owner: String,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub vlan: u16,
    pub network: String,
    pub os: String,
}

/// NIC parameters for the ephemeral VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub vlan_id: u16,
    pub network_uuid: Uuid,
}

/// Validated build request. Only produced by [`RequestParams::validate`]
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub iso: PathBuf,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub owner: Uuid,
    pub os: String,
    pub network: NetworkParams,
}

impl RequestParams {
    /// Check every field. No side effects happen before this succeeds.
    pub fn validate(self) -> Result<BuildRequest> {
        if !self.iso.is_file() {
            bail!("ISO not found: {}", self.iso.display());
        }
        validate_image_name(&self.name)?;
        if self.description.trim().is_empty() {
            bail!("description must not be empty");
        }
        if !(self.homepage.starts_with("http://") || self.homepage.starts_with("https://")) {
            bail!(
                "homepage must be an http:// or https:// URL, got '{}'",
                self.homepage
            );
        }
        if self.os.trim().is_empty() {
            bail!("OS family must not be empty");
        }

        let owner = parse_uuid(&self.owner, "owner")?;
        let network = NetworkParams {
            ip: parse_ipv4(&self.ip, "ip")?,
            netmask: parse_netmask(&self.netmask)?,
            gateway: parse_ipv4(&self.gateway, "gateway")?,
            vlan_id: self.vlan,
            network_uuid: parse_uuid(&self.network, "network")?,
        };
        network.validate()?;

        Ok(BuildRequest {
            iso: self.iso,
            name: self.name,
            description: self.description,
            homepage: self.homepage,
            owner,
            os: self.os,
            network,
        })
    }
}

impl NetworkParams {
    fn validate(&self) -> Result<()> {
        if self.vlan_id > MAX_VLAN_ID {
            bail!("vlan id {} out of range (0..={})", self.vlan_id, MAX_VLAN_ID);
        }
        let mask = u32::from(self.netmask);
        if u32::from(self.ip) & mask != u32::from(self.gateway) & mask {
            bail!(
                "gateway {} is not in the subnet of {}/{}",
                self.gateway,
                self.ip,
                self.netmask
            );
        }
        Ok(())
    }
}

/// Image names end up in file names and VM aliases.
fn validate_image_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("image name must not be empty");
    }
    if name.starts_with('.') || name.starts_with('-') {
        bail!("image name must not start with '.' or '-': '{}'", name);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        bail!("image name '{}' contains invalid character '{}'", name, c);
    }
    Ok(())
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("{field} must be a UUID, got '{raw}'"))
}

fn parse_ipv4(raw: &str, field: &str) -> Result<Ipv4Addr> {
    raw.trim()
        .parse()
        .with_context(|| format!("{field} must be an IPv4 address, got '{raw}'"))
}

fn parse_netmask(raw: &str) -> Result<Ipv4Addr> {
    let mask = parse_ipv4(raw, "netmask")?;
    let bits = u32::from(mask);
    let inverted = !bits;
    if bits == 0 || inverted & inverted.wrapping_add(1) != 0 {
        bail!("netmask {} is not a contiguous prefix", mask);
    }
    Ok(mask)
}
