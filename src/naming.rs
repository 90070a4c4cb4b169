//! Build date and the deterministic names derived from it.
//!
//! The date is read once per process and threaded through every stage, so a
//! build that crosses midnight still stamps all outputs identically.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::{Date, Month, OffsetDateTime};

/// Scratch template written before `vmadm create`.
pub const TEMPLATE_FILENAME: &str = "blank.json";

/// Single date stamp for one pipeline run, rendered as `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildDate(Date);

impl BuildDate {
    /// Current UTC date. Call once at process start.
    pub fn today_utc() -> Self {
        Self(OffsetDateTime::now_utc().date())
    }

    pub fn from_ymd(year: i32, month: u8, day: u8) -> Result<Self> {
        let month = Month::try_from(month).context("invalid build date month")?;
        let date = Date::from_calendar_date(year, month, day).context("invalid build date")?;
        Ok(Self(date))
    }
}

impl fmt::Display for BuildDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}",
            self.0.year(),
            self.0.month() as u8,
            self.0.day()
        )
    }
}

/// ZFS dataset backing the first disk of a KVM VM.
pub fn disk_dataset(pool: &str, vm_uuid: &str) -> String {
    format!("{pool}/{vm_uuid}-disk0")
}

/// Snapshot of the VM's primary disk for this build.
pub fn snapshot_name(pool: &str, vm_uuid: &str, date: BuildDate) -> String {
    format!("{}@{}", disk_dataset(pool, vm_uuid), date)
}

pub fn artifact_filename(image_name: &str, date: BuildDate) -> String {
    format!("{image_name}-{date}.zfs.gz")
}

pub fn manifest_filename(image_name: &str, date: BuildDate) -> String {
    format!("{image_name}-{date}.json")
}

/// Sibling path a deliverable is written to before it is renamed into place.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// Output paths of one run, rooted at the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub template: PathBuf,
    pub artifact: PathBuf,
    pub manifest: PathBuf,
}

impl OutputPaths {
    pub fn new(workdir: &Path, image_name: &str, date: BuildDate) -> Self {
        Self {
            template: workdir.join(TEMPLATE_FILENAME),
            artifact: workdir.join(artifact_filename(image_name, date)),
            manifest: workdir.join(manifest_filename(image_name, date)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> BuildDate {
        BuildDate::from_ymd(2024, 3, 7).unwrap()
    }

    #[test]
    fn build_date_is_zero_padded() {
        assert_eq!(date().to_string(), "20240307");
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(BuildDate::from_ymd(2023, 2, 30).is_err());
        assert!(BuildDate::from_ymd(2023, 13, 1).is_err());
    }

    #[test]
    fn names_are_pure_functions_of_inputs() {
        let vm = "4a5c1a3e-1111-2222-3333-444455556666";
        assert_eq!(
            snapshot_name("zones", vm, date()),
            "zones/4a5c1a3e-1111-2222-3333-444455556666-disk0@20240307"
        );
        assert_eq!(snapshot_name("zones", vm, date()), snapshot_name("zones", vm, date()));
        assert_eq!(artifact_filename("centos-7", date()), "centos-7-20240307.zfs.gz");
        assert_eq!(manifest_filename("centos-7", date()), "centos-7-20240307.json");
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/w/a-20240101.zfs.gz")),
            Path::new("/w/a-20240101.zfs.gz.partial")
        );
    }

    #[test]
    fn output_paths_share_one_date() {
        let paths = OutputPaths::new(Path::new("/work"), "centos-7", date());
        assert_eq!(paths.template, Path::new("/work/blank.json"));
        assert_eq!(paths.artifact, Path::new("/work/centos-7-20240307.zfs.gz"));
        assert_eq!(paths.manifest, Path::new("/work/centos-7-20240307.json"));
    }
}
