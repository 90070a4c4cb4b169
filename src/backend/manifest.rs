//! External manifest generator.
//!
//! The tool reads the artifact itself and prints the manifest on stdout;
//! this adapter only passes fields and captures the output.

use anyhow::{Context, Result};

use super::{ManifestFields, ManifestTool};
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct ImgManifest {
    program: String,
}

impl ImgManifest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, fields: &ManifestFields<'_>) -> Cmd {
        Cmd::new(&self.program)
            .arg("-f")
            .arg(fields.artifact)
            .args(["-n", fields.name])
            .arg("-s")
            .arg(fields.size_mib.to_string())
            .arg("-v")
            .arg(&fields.version)
            .args(["-d", fields.description])
            .args(["-h", fields.homepage])
            .args(["-o", fields.os])
    }
}

impl Default for ImgManifest {
    fn default() -> Self {
        Self::new("imgmanifest")
    }
}

impl ManifestTool for ImgManifest {
    fn generate(&self, fields: &ManifestFields<'_>) -> Result<Vec<u8>> {
        let out = self
            .command(fields)
            .run()
            .with_context(|| format!("generating manifest for '{}'", fields.name))?;
        Ok(out.stdout.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn passes_every_field() {
        let fields = ManifestFields {
            artifact: Path::new("centos-7-20240101.zfs.gz"),
            name: "centos-7",
            size_mib: 10240,
            version: "20240101".into(),
            description: "CentOS 7",
            homepage: "https://www.centos.org",
            os: "linux",
        };
        let line = ImgManifest::default().command(&fields).display();
        assert_eq!(
            line,
            "imgmanifest -f centos-7-20240101.zfs.gz -n centos-7 -s 10240 -v 20240101 \
             -d CentOS 7 -h https://www.centos.org -o linux"
        );
    }
}
