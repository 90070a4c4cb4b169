//! Builder configuration.
//!
//! Everything here has a default, so the file is optional. When given, it is
//! TOML with unknown keys rejected:
//!
//! ```toml
//! [vm]
//! ram_mib = 2048
//! disk_mib = 20480
//!
//! [poll]
//! timeout_secs = 0   # wait for the installer forever
//!
//! [preflight]
//! match = "substring"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    pub vm: VmConfig,
    pub poll: PollConfig,
    pub preflight: PreflightConfig,
    pub tools: ToolsConfig,
    pub output: OutputConfig,
}

/// Resources of the ephemeral VM.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    pub brand: String,
    pub ram_mib: u32,
    pub vcpus: u32,
    pub cpu_type: String,
    pub disk_mib: u64,
    pub disk_model: String,
    pub nic_model: String,
    pub nic_tag: String,
    /// Pool holding the VM's disk datasets.
    pub zfs_pool: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            brand: "kvm".to_string(),
            ram_mib: 1024,
            vcpus: 1,
            cpu_type: "host".to_string(),
            disk_mib: 10240,
            disk_model: "virtio".to_string(),
            nic_model: "virtio".to_string(),
            nic_tag: "admin".to_string(),
            zfs_pool: "zones".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Multiplier applied to the interval after every poll; 1.0 keeps it fixed.
    pub backoff: f64,
    pub max_interval_secs: u64,
    /// 0 disables the bound.
    pub timeout_secs: u64,
    /// Delay after `stopped` so the storage layer releases the disk.
    pub settle_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            backoff: 1.0,
            max_interval_secs: 30,
            timeout_secs: 24 * 60 * 60,
            settle_secs: 5,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs.max(self.interval_secs))
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// How the preflight guard matches VM aliases against the image name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasMatch {
    #[default]
    Exact,
    Substring,
}

impl AliasMatch {
    pub fn matches(self, alias: &str, name: &str) -> bool {
        match self {
            AliasMatch::Exact => alias == name,
            AliasMatch::Substring => alias.contains(name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightConfig {
    #[serde(rename = "match")]
    pub alias_match: AliasMatch,
    pub settle_secs: u64,
    /// Treat an inventory lookup failure as "no stale VM".
    pub lenient_lookup: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            alias_match: AliasMatch::Exact,
            settle_secs: 5,
            lenient_lookup: false,
        }
    }
}

impl PreflightConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Host commands, overridable for non-standard installs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub vmadm: String,
    pub zfs: String,
    pub manifest: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            vmadm: "vmadm".to_string(),
            zfs: "zfs".to_string(),
            manifest: "imgmanifest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub gzip_level: u32,
    pub keep_vm_on_failure: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            gzip_level: 9,
            keep_vm_on_failure: false,
        }
    }
}

impl BuilderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading builder config '{}'", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing builder config '{}'", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid builder config '{}'", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vm.ram_mib == 0 || self.vm.vcpus == 0 || self.vm.disk_mib == 0 {
            bail!("vm.ram_mib, vm.vcpus and vm.disk_mib must be nonzero");
        }
        if self.vm.zfs_pool.trim().is_empty() {
            bail!("vm.zfs_pool must not be empty");
        }
        if self.poll.interval_secs == 0 {
            bail!("poll.interval_secs must be at least 1");
        }
        if !(self.poll.backoff.is_finite() && self.poll.backoff >= 1.0) {
            bail!("poll.backoff must be >= 1.0, got {}", self.poll.backoff);
        }
        if self.output.gzip_level > 9 {
            bail!("output.gzip_level must be 0..=9, got {}", self.output.gzip_level);
        }
        Ok(())
    }
}
