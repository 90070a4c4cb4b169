//! Build reusable VM disk images on a SmartOS-style hypervisor host.
//!
//! A run takes an installer ISO plus image metadata and produces two files
//! in the working directory: a gzip-compressed disk stream and a manifest
//! describing it.
//!
//! ```text
//! vm-image-builder
//!     │
//!     ├── preflight   remove stale VMs with the same alias
//!     ├── provision   write template, create ephemeral VM
//!     ├── install     copy ISO into the zone, boot from CD-ROM
//!     ├── console     print the VNC endpoint for the operator
//!     ├── poll        wait until the installer powers the VM off
//!     ├── export      snapshot the disk, stream it through gzip
//!     ├── manifest    run the manifest tool against the artifact
//!     └── cleanup     delete the VM and the scratch template
//! ```
//!
//! Host access goes through the traits in [`backend`]; the binary wires in
//! the `vmadm`/`zfs`/`imgmanifest` implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use vm_image_builder::backend::{Backend, ImgManifest, SystemClock, Vmadm, Zfs};
//! use vm_image_builder::{BuildDate, BuilderConfig, Pipeline};
//!
//! let config = BuilderConfig::default();
//! let (vmadm, zfs, manifest) = (Vmadm::default(), Zfs::default(), ImgManifest::default());
//! let backend = Backend {
//!     inventory: &vmadm,
//!     storage: &zfs,
//!     manifest: &manifest,
//!     clock: &SystemClock,
//! };
//! let output = Pipeline::new(backend, &config, ".").run(&request, BuildDate::today_utc())?;
//! println!("{}", output.artifact.display());
//! ```

pub mod backend;
pub mod config;
pub mod lease;
pub mod naming;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod request;
pub mod signal;
pub mod stages;
pub mod template;

#[cfg(test)]
pub(crate) mod fakes;

pub use config::BuilderConfig;
pub use naming::BuildDate;
pub use pipeline::{BuildOutput, Pipeline};
pub use request::{BuildRequest, RequestParams};
