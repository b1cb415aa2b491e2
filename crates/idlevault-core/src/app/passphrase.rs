use std::time::Duration;

use zeroize::{Zeroize, Zeroizing};

use crate::config::EncryptionConfig;
use crate::error::{IdlevaultError, Result};
use crate::platform::shell;

pub const PASSPHRASE_ENV: &str = "IDLEVAULT_PASSPHRASE";

const PASSCOMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolve the artifact passphrase.
///
/// Precedence: `encryption.passphrase` > `encryption.passcommand` >
/// `IDLEVAULT_PASSPHRASE`. The agent cannot prompt, so finding none is a
/// configuration error.
pub fn resolve_passphrase(config: &EncryptionConfig) -> Result<Zeroizing<String>> {
    if let Some(p) = config.passphrase.as_deref().filter(|p| !p.is_empty()) {
        return Ok(Zeroizing::new(p.to_string()));
    }

    if let Some(cmd) = config.passcommand.as_deref() {
        return run_passcommand(cmd);
    }

    if let Ok(mut pass) = std::env::var(PASSPHRASE_ENV) {
        if !pass.is_empty() {
            return Ok(Zeroizing::new(std::mem::take(&mut pass)));
        }
    }

    Err(IdlevaultError::Config(format!(
        "no passphrase configured: set encryption.passphrase, encryption.passcommand or {PASSPHRASE_ENV}"
    )))
}

fn run_passcommand(cmd: &str) -> Result<Zeroizing<String>> {
    let output = shell::run_script_with_timeout(cmd, PASSCOMMAND_TIMEOUT)
        .map_err(|e| IdlevaultError::Config(format!("passcommand could not run: {e}")))?;

    if !output.status.success() {
        return Err(IdlevaultError::Config(format!(
            "passcommand failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let mut raw = String::from_utf8(output.stdout)
        .map_err(|e| IdlevaultError::Config(format!("passcommand output is not UTF-8: {e}")))?;
    let pass = Zeroizing::new(raw.trim().to_string());
    raw.zeroize();

    if pass.is_empty() {
        return Err(IdlevaultError::Config(
            "passcommand returned an empty passphrase".into(),
        ));
    }
    Ok(pass)
}
