//! Finding and vetting the host application's data directory.

mod ini;
mod locator;
mod validate;

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

pub use self::ini::{locate_ini, normalize_separators, read_data_root};
pub use self::locator::{platform_candidates, CandidateLocator, InstallationLocator};
pub use self::validate::{
    is_network_path, probe_permissions, validate_data_root, PermissionCheck, ValidatedRoot,
};

use crate::config::HostConfig;
use crate::error::Result;

/// Name of the file the permission probe writes into the data root.
pub const PERM_PROBE_NAME: &str = ".idlevault_perm_probe";

/// Where the data root setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRootSource {
    Configured,
    Ini(PathBuf),
}

impl fmt::Display for DataRootSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRootSource::Configured => f.write_str("configuration"),
            DataRootSource::Ini(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Result of the full startup check.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub source: DataRootSource,
    pub validated: ValidatedRoot,
}

impl StartupReport {
    pub fn data_root(&self) -> &Path {
        &self.validated.root
    }
}

/// Resolve the data root: an explicit `host.data_root` wins, otherwise the
/// locator finds the install and its ini names the root.
pub fn resolve_data_root(
    host: &HostConfig,
    locator: &dyn InstallationLocator,
) -> Result<(PathBuf, DataRootSource)> {
    if let Some(root) = host.data_root() {
        info!(root = %root.display(), "using configured data root");
        return Ok((root, DataRootSource::Configured));
    }
    let install = locator.locate()?;
    let ini = locate_ini(&install, &host.ini_name)?;
    let root = PathBuf::from(read_data_root(&ini)?);
    info!(root = %root.display(), ini = %ini.display(), "data root read from host configuration");
    Ok((root, DataRootSource::Ini(ini)))
}

/// Resolve and validate the data root. Every error here is a startup error.
pub fn startup_check(
    host: &HostConfig,
    numeric_only: bool,
    locator: &dyn InstallationLocator,
) -> Result<StartupReport> {
    let (root, source) = resolve_data_root(host, locator)?;
    let validated = validate_data_root(&root, numeric_only)?;
    Ok(StartupReport { source, validated })
}
