//! State threaded through one pipeline run.
//!
//! Filled in stage order (request -> template -> VM -> snapshot -> artifact).
//! Each slot is written exactly once; reading a slot before its stage ran is
//! an error rather than a silent default.

use anyhow::{bail, Result};
use std::path::Path;

use crate::naming::{BuildDate, OutputPaths};
use crate::request::BuildRequest;
use crate::stages::s05_export::ExportReport;
use crate::template::VmTemplate;

#[derive(Debug)]
pub struct PipelineContext {
    build_date: BuildDate,
    paths: OutputPaths,
    template: Option<VmTemplate>,
    vm_uuid: Option<String>,
    snapshot: Option<String>,
    export: Option<ExportReport>,
}

impl PipelineContext {
    pub fn new(request: &BuildRequest, build_date: BuildDate, workdir: &Path) -> Self {
        Self {
            build_date,
            paths: OutputPaths::new(workdir, &request.name, build_date),
            template: None,
            vm_uuid: None,
            snapshot: None,
            export: None,
        }
    }

    pub fn build_date(&self) -> BuildDate {
        self.build_date
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    pub fn record_template(&mut self, template: VmTemplate) -> Result<()> {
        fill(&mut self.template, template, "template")
    }

    pub fn template(&self) -> Result<&VmTemplate> {
        require(&self.template, "template")
    }

    pub fn record_vm(&mut self, uuid: &str) -> Result<()> {
        fill(&mut self.vm_uuid, uuid.to_string(), "VM uuid")
    }

    pub fn vm_uuid(&self) -> Result<&str> {
        require(&self.vm_uuid, "VM uuid").map(String::as_str)
    }

    pub fn record_snapshot(&mut self, snapshot: String) -> Result<()> {
        fill(&mut self.snapshot, snapshot, "snapshot")
    }

    pub fn snapshot(&self) -> Result<&str> {
        require(&self.snapshot, "snapshot").map(String::as_str)
    }

    pub fn record_export(&mut self, export: ExportReport) -> Result<()> {
        fill(&mut self.export, export, "artifact")
    }

    pub fn export(&self) -> Result<&ExportReport> {
        require(&self.export, "artifact")
    }
}

fn fill<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<()> {
    if slot.is_some() {
        bail!("pipeline {what} already recorded");
    }
    *slot = Some(value);
    Ok(())
}

fn require<'a, T>(slot: &'a Option<T>, what: &str) -> Result<&'a T> {
    match slot {
        Some(value) => Ok(value),
        None => bail!("pipeline {what} requested before it was recorded"),
    }
}
