use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use idlevault_types::artifact::ArtifactName;

use crate::error::Result;

/// Encrypted artifacts waiting in `staging_dir`, oldest first.
///
/// Only well-formed `backup_<timestamp>_<dataset>.enc` files count. Leftover
/// `.partial` files from an interrupted encryption are deleted along the way.
pub fn pending_artifacts(staging_dir: &Path) -> Result<Vec<(PathBuf, ArtifactName)>> {
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut pending = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.ends_with(".partial") {
            debug!(file = %file_name, "removing interrupted artifact");
            let _ = fs::remove_file(entry.path());
            continue;
        }
        if let Some(artifact) = ArtifactName::parse(&file_name) {
            pending.push((entry.path(), artifact));
        }
    }
    pending.sort_by(|a, b| {
        a.1.created()
            .cmp(&b.1.created())
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(pending)
}
