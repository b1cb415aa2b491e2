use std::fmt;
use std::path::{Path, PathBuf};

use super::types::IdlevaultConfig;
use crate::error::{IdlevaultError, Result};

pub const CONFIG_ENV: &str = "IDLEVAULT_CONFIG";

/// Expand `${VAR}` and `${VAR:-default}` placeholders in raw config text.
fn expand_env_placeholders(input: &str, path: &Path) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0usize;

    while let Some(offset) = input[cursor..].find("${") {
        let start = cursor + offset;
        out.push_str(&input[cursor..start]);

        let token_start = start + 2;
        let Some(token_end_rel) = input[token_start..].find('}') else {
            return Err(config_expand_error(
                path,
                input,
                start,
                "unterminated environment placeholder",
            ));
        };
        let token_end = token_start + token_end_rel;
        let token = &input[token_start..token_end];
        out.push_str(&resolve_env_token(token, path, input, start)?);
        cursor = token_end + 1;
    }

    out.push_str(&input[cursor..]);
    Ok(out)
}

fn resolve_env_token(token: &str, path: &Path, input: &str, start: usize) -> Result<String> {
    let (name, default) = match token.find(":-") {
        Some(split_at) => (&token[..split_at], Some(&token[split_at + 2..])),
        None => (token, None),
    };
    if !is_valid_env_var_name(name) {
        return Err(config_expand_error(
            path,
            input,
            start,
            format!("invalid environment placeholder '{token}'"),
        ));
    }

    match (std::env::var(name), default) {
        (Ok(value), Some(default)) if value.is_empty() => Ok(default.to_string()),
        (Ok(value), _) => Ok(value),
        (Err(std::env::VarError::NotPresent), Some(default)) => Ok(default.to_string()),
        (Err(std::env::VarError::NotPresent), None) => Err(config_expand_error(
            path,
            input,
            start,
            format!("environment variable '{name}' is not set"),
        )),
        (Err(std::env::VarError::NotUnicode(_)), _) => Err(config_expand_error(
            path,
            input,
            start,
            format!("environment variable '{name}' is not valid UTF-8"),
        )),
    }
}

fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first == '_' || first.is_ascii_alphabetic()) {
        return false;
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn config_expand_error(
    path: &Path,
    input: &str,
    start: usize,
    message: impl fmt::Display,
) -> IdlevaultError {
    let (line, column) = byte_offset_to_line_col(input, start);
    IdlevaultError::Config(format!(
        "invalid config '{}': {message} at line {line}, column {column}",
        path.display()
    ))
}

fn byte_offset_to_line_col(input: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1usize;
    let mut column = 1usize;
    for ch in input[..byte_offset].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Parse and validate a config file.
pub fn load_config(path: &Path) -> Result<IdlevaultConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        IdlevaultError::Config(format!("cannot read '{}': {e}", path.display()))
    })?;
    parse_config(&contents, path)
}

/// Parse config text; `path` is only used in error messages.
pub fn parse_config(contents: &str, path: &Path) -> Result<IdlevaultConfig> {
    let expanded = expand_env_placeholders(contents, path)?;
    let config: IdlevaultConfig = serde_yaml::from_str(&expanded).map_err(|e| {
        IdlevaultError::Config(format!("invalid config '{}': {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Tracks where the config file was found.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `IDLEVAULT_CONFIG` env var.
    EnvVar(PathBuf),
    /// Found by searching standard locations.
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) => p,
            ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} ({CONFIG_ENV})", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({})", path.display(), level)
            }
        }
    }
}

/// Returns search locations in priority order: project, user, system.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("idlevault.yaml"), "project")];

    if let Some(base) = dirs::config_dir() {
        paths.push((base.join("idlevault").join("config.yaml"), "user"));
    }

    #[cfg(windows)]
    {
        let program_data = std::env::var_os("PROGRAMDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        paths.push((program_data.join("idlevault").join("config.yaml"), "system"));
    }

    #[cfg(not(windows))]
    {
        paths.push((PathBuf::from("/etc/idlevault/config.yaml"), "system"));
    }

    paths
}

/// Resolve which config file to use.
///
/// Priority: CLI arg > `IDLEVAULT_CONFIG` env var > first existing file from
/// search paths. Returns `None` if nothing is found.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var(CONFIG_ENV) {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}

/// Returns a starter YAML config.
pub fn minimal_config_template() -> &'static str {
    r#"# idlevault configuration file

# Identifies this installation in remote object keys.
client_id: my-company

storage:
  bucket: my-backup-bucket
  region: us-east-1
  # endpoint: https://s3.example.com   # S3-compatible services
  # access_key_id / secret_access_key default to AWS_ACCESS_KEY_ID /
  # AWS_SECRET_ACCESS_KEY. Use bucket: file:///path/to/dir for a local target.

encryption:
  # Prefer passcommand or the IDLEVAULT_PASSPHRASE environment variable.
  passcommand: "cat /etc/idlevault/passphrase"

# --- Common optional settings (uncomment as needed) ---

# host:
#   process_prefix: tally
#   install_dir: "C:\\TallyPrime"
#   data_root: "C:\\TallyPrime\\Data"
#
# watch:
#   quiet_window_seconds: 120
#   poll_interval_seconds: 5
#   cooldown_seconds: 10
#
# pipeline:
#   keep_uploaded: false
#   numeric_only: true
#   zstd_level: 3
#
# logging:                 # `idlevault run` also writes agent.log here
#   dir: /var/log/idlevault
#   max_file_mb: 10
#   max_files: 10
"#
}
