//! The build pipeline.
//!
//! ```text
//! preflight -> provision -> install -> console -> poll -> export -> manifest -> cleanup
//! ```
//!
//! Stages run strictly in order and the first error aborts the run. Every
//! resource is wrapped in a guard from [`crate::lease`] as soon as it exists,
//! so an aborted or cancelled run still deletes its VM, removes the scratch
//! template and leaves no partial deliverables behind.

pub mod context;

use anyhow::{bail, Result};
use std::fmt::Display;
use std::path::PathBuf;

use crate::backend::{Backend, ManifestFields};
use crate::config::BuilderConfig;
use crate::lease::{OutputGuard, ScratchFile, WorkdirLock};
use crate::naming::{self, BuildDate};
use crate::preflight::{
    remove_stale_vms, resolve_lookup_failure, LookupFailurePolicy, PreflightOutcome,
};
use crate::request::BuildRequest;
use crate::signal::CancelToken;
use crate::stages::s01_provision::provision;
use crate::stages::s02_install::install;
use crate::stages::s03_console::report_console;
use crate::stages::s04_poll::{wait_for_stopped, PollSettings};
use crate::stages::s05_export::{export_snapshot, snapshot_disk};
use crate::stages::s06_manifest::write_manifest;
use crate::template::VmTemplate;

pub use context::PipelineContext;

/// Deliverables of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub build_date: BuildDate,
    /// UUID of the (now deleted) ephemeral VM.
    pub vm_uuid: String,
    pub artifact: PathBuf,
    pub manifest: PathBuf,
    pub compressed_bytes: u64,
    pub sha256: String,
}

/// One configured pipeline, bound to a backend and a working directory.
pub struct Pipeline<'a> {
    backend: Backend<'a>,
    config: &'a BuilderConfig,
    workdir: PathBuf,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(backend: Backend<'a>, config: &'a BuilderConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            config,
            workdir: workdir.into(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("build cancelled");
        }
        Ok(())
    }

    /// Run every stage for `request`, stamping all outputs with `build_date`.
    pub fn run(&self, request: &BuildRequest, build_date: BuildDate) -> Result<BuildOutput> {
        let Backend {
            inventory,
            storage,
            manifest,
            clock,
        } = self.backend;
        let name = request.name.as_str();

        let _lock = WorkdirLock::acquire(&self.workdir)?;
        let mut ctx = PipelineContext::new(request, build_date, &self.workdir);
        self.check_cancelled()?;

        progress("preflight", name, "checking for stale VMs");
        let policy = LookupFailurePolicy::from_lenient(self.config.preflight.lenient_lookup);
        match resolve_lookup_failure(
            remove_stale_vms(inventory, clock, name, &self.config.preflight),
            policy,
        )? {
            PreflightOutcome::Absent => println!("  No stale VM named '{}'", name),
            PreflightOutcome::Removed(ids) => println!("  Removed {} stale VM(s)", ids.len()),
        }
        self.check_cancelled()?;

        progress("provision", name, "creating ephemeral VM");
        ctx.record_template(VmTemplate::from_request(request, &self.config.vm))?;
        let scratch = ScratchFile::new(ctx.paths().template.clone());
        let mut lease = provision(inventory, ctx.template()?, &scratch)?;
        lease.keep_on_failure(self.config.output.keep_vm_on_failure);
        ctx.record_vm(lease.uuid())?;
        println!("  VM {}", lease.uuid());
        self.check_cancelled()?;

        progress("install", name, format!("booting from {}", request.iso.display()));
        install(inventory, ctx.vm_uuid()?, &request.iso)?;

        progress("console", name, "operator access");
        report_console(inventory, ctx.vm_uuid()?);

        progress("poll", name, "waiting for the installer to power off the VM");
        let settings = PollSettings::from(&self.config.poll);
        let report = wait_for_stopped(inventory, clock, ctx.vm_uuid()?, &settings, &self.cancel)?;
        println!(
            "  VM stopped after {}s ({} polls)",
            report.waited.as_secs(),
            report.polls
        );
        self.check_cancelled()?;

        progress("export", name, "snapshotting disk");
        let snapshot =
            naming::snapshot_name(&self.config.vm.zfs_pool, ctx.vm_uuid()?, ctx.build_date());
        snapshot_disk(storage, &snapshot)?;
        ctx.record_snapshot(snapshot)?;

        let export = export_snapshot(
            storage,
            ctx.snapshot()?,
            &ctx.paths().artifact,
            self.config.output.gzip_level,
            &self.cancel,
        )?;
        // Only files this run has written go into the guard; a previous
        // run's deliverables survive a failed rerun.
        let mut outputs = OutputGuard::new();
        outputs.track(export.artifact.clone());
        println!(
            "  Wrote {} ({} bytes, sha256 {})",
            export.artifact.display(),
            export.compressed_bytes,
            export.sha256
        );
        ctx.record_export(export)?;
        self.check_cancelled()?;

        progress("manifest", name, "generating manifest");
        let fields = ManifestFields {
            artifact: &ctx.export()?.artifact,
            name,
            size_mib: ctx.template()?.disk_size_mib(),
            version: ctx.build_date().to_string(),
            description: &request.description,
            homepage: &request.homepage,
            os: &request.os,
        };
        write_manifest(manifest, &fields, &ctx.paths().manifest)?;
        outputs.track(ctx.paths().manifest.clone());

        progress("cleanup", name, "deleting ephemeral VM");
        let vm_uuid = ctx.vm_uuid()?.to_string();
        outputs.commit();
        lease.release()?;
        drop(scratch);

        let export = ctx.export()?;
        Ok(BuildOutput {
            build_date: ctx.build_date(),
            vm_uuid,
            artifact: export.artifact.clone(),
            manifest: ctx.paths().manifest.clone(),
            compressed_bytes: export.compressed_bytes,
            sha256: export.sha256.clone(),
        })
    }
}

fn progress(stage: &str, name: &str, message: impl Display) {
    println!("[build:{stage}:{name}] {message}");
}
