//! Scoped ownership of everything a build creates.
//!
//! Each resource gets its finalizer the moment it exists, and the finalizer
//! runs from `Drop` on every exit path: success, error, or cancellation.
//!
//! - [`VmLease`] deletes the ephemeral VM
//! - [`ScratchFile`] removes the template file
//! - [`OutputGuard`] removes half-produced deliverables unless committed
//! - [`WorkdirLock`] keeps a second build out of the same directory

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::backend::VmInventory;

/// Lock file created in the working directory for the duration of a build.
pub const LOCK_FILENAME: &str = ".vm-image-builder.lock";

/// Exclusive ownership of an ephemeral VM.
pub struct VmLease<'a> {
    inventory: &'a dyn VmInventory,
    uuid: String,
    keep_on_drop: bool,
    released: bool,
}

impl<'a> VmLease<'a> {
    pub fn new(inventory: &'a dyn VmInventory, uuid: String) -> Self {
        Self {
            inventory,
            uuid,
            keep_on_drop: false,
            released: false,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Leave the VM behind if the lease is dropped without `release`.
    pub fn keep_on_failure(&mut self, keep: bool) {
        self.keep_on_drop = keep;
    }

    /// Delete the VM now, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.inventory
            .delete(&self.uuid)
            .with_context(|| format!("releasing ephemeral VM {}", self.uuid))
    }
}

impl Drop for VmLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.keep_on_drop {
            eprintln!(
                "  [WARN] Leaving VM {} in place for inspection; delete it with `vmadm delete {}`",
                self.uuid, self.uuid
            );
            return;
        }
        tracing::info!(vm = %self.uuid, "tearing down ephemeral VM");
        if let Err(e) = self.inventory.delete(&self.uuid) {
            eprintln!(
                "  [WARN] Could not delete VM {} during teardown: {:#}",
                self.uuid, e
            );
        }
    }
}

/// A file that is removed when the guard goes out of scope.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => eprintln!(
                "  [WARN] Could not remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Deliverable files that only survive if the whole build succeeds.
#[derive(Debug, Default)]
pub struct OutputGuard {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl OutputGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `path` for removal on failure.
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Keep every tracked file.
    pub fn commit(mut self) -> Vec<PathBuf> {
        self.committed = true;
        std::mem::take(&mut self.paths)
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            if path.exists() {
                tracing::info!(path = %path.display(), "removing incomplete output");
                if let Err(e) = fs::remove_file(path) {
                    eprintln!(
                        "  [WARN] Could not remove incomplete output {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }
    }
}

/// Exclusive advisory lock on the working directory.
#[derive(Debug)]
pub struct WorkdirLock {
    _file: File,
}

impl WorkdirLock {
    pub fn acquire(workdir: &Path) -> Result<Self> {
        let path = workdir.join(LOCK_FILENAME);
        // Never unlink the lock file; a second process could then lock a fresh inode.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(anyhow::anyhow!(
                "Another build is running in {} (lock: {})",
                workdir.display(),
                path.display()
            ));
        }

        Ok(Self { _file: file })
    }
}
