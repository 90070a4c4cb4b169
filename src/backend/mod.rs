//! Seams between the pipeline and the host.
//!
//! The pipeline only talks to these traits. Production adapters shell out to
//! `vmadm`, `zfs` and the manifest tool; tests swap in in-memory fakes and a
//! fake [`Clock`].
//!
//! - [`vmadm`] - VM inventory via `vmadm`
//! - [`zfs`] - snapshots and send streams via `zfs`
//! - [`manifest`] - external manifest generator

pub mod manifest;
pub mod vmadm;
pub mod zfs;

use anyhow::Result;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub use manifest::ImgManifest;
pub use vmadm::Vmadm;
pub use zfs::Zfs;

/// Lifecycle state reported by the VM inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    Configured,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Failed,
    Other(String),
}

impl VmState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "configured" => VmState::Configured,
            "provisioning" => VmState::Provisioning,
            "running" => VmState::Running,
            "stopping" => VmState::Stopping,
            "stopped" => VmState::Stopped,
            "failed" => VmState::Failed,
            other => VmState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Configured => "configured",
            VmState::Provisioning => "provisioning",
            VmState::Running => "running",
            VmState::Stopping => "stopping",
            VmState::Stopped => "stopped",
            VmState::Failed => "failed",
            VmState::Other(other) => other,
        };
        f.write_str(s)
    }
}

/// One row of the VM inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSummary {
    pub uuid: String,
    pub alias: String,
}

/// Remote display endpoint for operator interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VncEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for VncEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// VM inventory operations.
pub trait VmInventory {
    fn list(&self) -> Result<Vec<VmSummary>>;

    /// Create a VM from a template file, returning its new UUID.
    fn create(&self, template: &Path) -> Result<String>;

    /// Host path of the filesystem root exposed to the VM.
    fn zone_root(&self, uuid: &str) -> Result<PathBuf>;

    /// Boot once from `iso_name`, which must already sit in the zone root.
    fn boot_from_cdrom(&self, uuid: &str, iso_name: &str) -> Result<()>;

    fn vnc(&self, uuid: &str) -> Result<VncEndpoint>;

    fn state(&self, uuid: &str) -> Result<VmState>;

    fn delete(&self, uuid: &str) -> Result<()>;
}

/// Block storage holding VM disks.
pub trait BlockStorage {
    fn snapshot(&self, snapshot: &str) -> Result<()>;

    /// Stream the serialized snapshot into `sink`, returning bytes written.
    fn send(&self, snapshot: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// Fields handed to the manifest generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFields<'a> {
    pub artifact: &'a Path,
    pub name: &'a str,
    pub size_mib: u64,
    pub version: String,
    pub description: &'a str,
    pub homepage: &'a str,
    pub os: &'a str,
}

pub trait ManifestTool {
    /// Run the generator and return what it printed.
    fn generate(&self, fields: &ManifestFields<'_>) -> Result<Vec<u8>>;
}

/// Time source for polling and settle delays.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Everything the pipeline needs from the host, borrowed for one run.
#[derive(Clone, Copy)]
pub struct Backend<'a> {
    pub inventory: &'a dyn VmInventory,
    pub storage: &'a dyn BlockStorage,
    pub manifest: &'a dyn ManifestTool,
    pub clock: &'a dyn Clock,
}
