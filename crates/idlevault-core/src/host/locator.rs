use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{IdlevaultError, Result};

/// Finds the host application's installation directory.
pub trait InstallationLocator {
    fn locate(&self) -> Result<PathBuf>;
}

/// Checks a fixed list of directories and returns the first that exists.
#[derive(Debug, Clone)]
pub struct CandidateLocator {
    candidates: Vec<PathBuf>,
}

impl CandidateLocator {
    /// The configured directory (if any) first, then the directory the
    /// installer registered, then the platform defaults.
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            candidates: ordered_candidates(configured, registered_install_dir(), platform_candidates()),
        }
    }

    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

impl InstallationLocator for CandidateLocator {
    fn locate(&self) -> Result<PathBuf> {
        for candidate in &self.candidates {
            if candidate.is_dir() {
                info!(install_dir = %candidate.display(), "found host installation");
                return Ok(candidate.clone());
            }
            debug!(candidate = %candidate.display(), "no installation here");
        }
        Err(IdlevaultError::InstallNotFound(
            self.candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        ))
    }
}

fn ordered_candidates(
    configured: Option<PathBuf>,
    registered: Option<PathBuf>,
    defaults: Vec<PathBuf>,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for p in configured.into_iter().chain(registered).chain(defaults) {
        if !candidates.contains(&p) {
            candidates.push(p);
        }
    }
    candidates
}

/// `InstallDir` under `HKLM\SOFTWARE\Tally\TallyPrime`, if the installer
/// wrote one.
#[cfg(windows)]
pub fn registered_install_dir() -> Option<PathBuf> {
    use std::ffi::{OsStr, OsString};
    use std::os::windows::ffi::{OsStrExt, OsStringExt};

    use windows_sys::Win32::Foundation::ERROR_SUCCESS;
    use windows_sys::Win32::System::Registry::{RegGetValueW, HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ};

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(Some(0)).collect()
    }

    let key = wide(r"SOFTWARE\Tally\TallyPrime");
    let value = wide("InstallDir");

    let mut size: u32 = 0;
    // Safety: both names are NUL-terminated; a null buffer only queries the size.
    let status = unsafe {
        RegGetValueW(
            HKEY_LOCAL_MACHINE,
            key.as_ptr(),
            value.as_ptr(),
            RRF_RT_REG_SZ,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut size,
        )
    };
    if status != ERROR_SUCCESS || size < 2 {
        debug!(status, "no registered installation");
        return None;
    }

    let mut buf = vec![0u16; (size as usize).div_ceil(2)];
    let mut size = (buf.len() * 2) as u32;
    // Safety: `buf` holds `size` bytes.
    let status = unsafe {
        RegGetValueW(
            HKEY_LOCAL_MACHINE,
            key.as_ptr(),
            value.as_ptr(),
            RRF_RT_REG_SZ,
            std::ptr::null_mut(),
            buf.as_mut_ptr().cast(),
            &mut size,
        )
    };
    if status != ERROR_SUCCESS {
        debug!(status, "reading registered installation failed");
        return None;
    }

    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    let dir = OsString::from_wide(&buf[..len]);
    let dir = PathBuf::from(dir.to_string_lossy().trim());
    if dir.as_os_str().is_empty() {
        return None;
    }
    debug!(install_dir = %dir.display(), "registry names an installation");
    Some(dir)
}

#[cfg(not(windows))]
pub fn registered_install_dir() -> Option<PathBuf> {
    None
}

#[cfg(windows)]
pub fn platform_candidates() -> Vec<PathBuf> {
    let program_files = |var: &str, fallback: &str| {
        std::env::var_os(var)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(fallback))
    };
    vec![
        program_files("ProgramFiles", r"C:\Program Files").join("TallyPrime"),
        program_files("ProgramFiles(x86)", r"C:\Program Files (x86)").join("TallyPrime"),
        PathBuf::from(r"C:\TallyPrime"),
    ]
}

#[cfg(not(windows))]
pub fn platform_candidates() -> Vec<PathBuf> {
    vec![PathBuf::from("/opt/tallyprime")]
}
