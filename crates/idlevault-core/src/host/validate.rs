use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::PERM_PROBE_NAME;
use crate::error::{IdlevaultError, Result};
use crate::pipeline::list_datasets;

/// Outcome of the write probe on the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    /// Probe written and removed.
    Verified,
    /// The OS refused the write.
    Denied(String),
    /// The probe failed for some other reason; access is unknown.
    Unverified(String),
}

impl fmt::Display for PermissionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionCheck::Verified => f.write_str("verified"),
            PermissionCheck::Denied(reason) => write!(f, "denied ({reason})"),
            PermissionCheck::Unverified(reason) => write!(f, "unverified ({reason})"),
        }
    }
}

/// A data root that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRoot {
    pub root: PathBuf,
    pub datasets: Vec<PathBuf>,
    pub permission: PermissionCheck,
}

/// Whether `path` points at a network share.
pub fn is_network_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.starts_with(r"\\") || s.starts_with("//")
}

/// Write and remove a probe file directly under `root`.
pub fn probe_permissions(root: &Path) -> PermissionCheck {
    let probe = root.join(PERM_PROBE_NAME);
    let written = fs::File::create(&probe).and_then(|mut f| {
        f.write_all(b"idlevault")?;
        f.sync_all()
    });
    let removed = match written {
        Ok(()) => fs::remove_file(&probe),
        Err(_) => {
            let _ = fs::remove_file(&probe);
            Ok(())
        }
    };
    classify_probe(written, removed)
}

/// Only an explicit `PermissionDenied` counts as denied.
fn classify_probe(written: io::Result<()>, removed: io::Result<()>) -> PermissionCheck {
    let (context, err) = match (written, removed) {
        (Ok(()), Ok(())) => return PermissionCheck::Verified,
        (Err(e), _) => ("", e),
        (Ok(()), Err(e)) => ("cannot remove probe: ", e),
    };
    let reason = format!("{context}{err}");
    if err.kind() == ErrorKind::PermissionDenied {
        PermissionCheck::Denied(reason)
    } else {
        PermissionCheck::Unverified(reason)
    }
}

/// Denied is fatal; unverified only warns.
fn enforce_permission(root: &Path, permission: &PermissionCheck) -> Result<()> {
    match permission {
        PermissionCheck::Verified => Ok(()),
        PermissionCheck::Denied(reason) => Err(IdlevaultError::PermissionDenied {
            path: root.display().to_string(),
            reason: reason.clone(),
        }),
        PermissionCheck::Unverified(reason) => {
            warn!(root = %root.display(), reason = %reason, "could not verify access to data root");
            Ok(())
        }
    }
}

/// Check that `root` exists, is accessible, and holds datasets.
///
/// Fails on a missing root, a denied permission probe, or an empty dataset
/// list. A network-share root or an inconclusive probe only warns.
pub fn validate_data_root(root: &Path, numeric_only: bool) -> Result<ValidatedRoot> {
    if !root.is_dir() {
        return Err(IdlevaultError::DataRootNotFound(root.display().to_string()));
    }
    if is_network_path(root) {
        warn!(root = %root.display(), "data root is on a network share; backups may be slow or incomplete");
    }

    let permission = probe_permissions(root);
    enforce_permission(root, &permission)?;

    let datasets = list_datasets(root, numeric_only)?;
    if datasets.is_empty() {
        return Err(IdlevaultError::NoDatasets(root.display().to_string()));
    }
    info!(root = %root.display(), datasets = datasets.len(), "data root validated");

    Ok(ValidatedRoot {
        root: root.to_path_buf(),
        datasets,
        permission,
    })
}
