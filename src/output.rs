//! Export file naming and serialization.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::export::ExportedObservation;

/// `records-<route>.json` inside `dir`.
pub fn export_path(dir: &Path, route_tag: &str) -> PathBuf {
    dir.join(format!("records-{route_tag}.json"))
}

/// Pretty-printed JSON array (two-space indent) of `records`.
pub fn render_records(records: &[ExportedObservation]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Writes `records` to `path`, replacing any previous export.
pub fn write_records(path: &Path, records: &[ExportedObservation]) -> Result<()> {
    let json = render_records(records)?;
    debug!(path = %path.display(), bytes = json.len(), "Writing export");

    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), records = records.len(), "Export written");

    Ok(())
}
