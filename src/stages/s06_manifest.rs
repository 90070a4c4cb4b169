use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::backend::{ManifestFields, ManifestTool};
use crate::naming::partial_path;

/// Run the manifest tool and capture its output into `manifest_path`.
///
/// The output is stored verbatim; it is not parsed or checked. An existing
/// manifest is only replaced once the new one is fully written.
pub fn write_manifest(
    tool: &dyn ManifestTool,
    fields: &ManifestFields<'_>,
    manifest_path: &Path,
) -> Result<u64> {
    let manifest = tool.generate(fields)?;
    let partial = partial_path(manifest_path);
    if let Err(e) = fs::write(&partial, &manifest) {
        let _ = fs::remove_file(&partial);
        return Err(e).with_context(|| format!("writing manifest '{}'", partial.display()));
    }
    fs::rename(&partial, manifest_path).with_context(|| {
        format!(
            "moving '{}' into place as '{}'",
            partial.display(),
            manifest_path.display()
        )
    })?;
    Ok(manifest.len() as u64)
}
