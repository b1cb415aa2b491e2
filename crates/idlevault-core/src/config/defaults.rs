use std::path::PathBuf;

pub(super) fn default_process_prefix() -> String {
    "tally".to_string()
}

pub(super) fn default_ini_name() -> String {
    "tally.ini".to_string()
}

pub(super) fn default_quiet_window_seconds() -> u64 {
    120
}

pub(super) fn default_poll_interval_seconds() -> u64 {
    5
}

pub(super) fn default_cooldown_seconds() -> u64 {
    10
}

/// Upper bound for every `watch.*_seconds` value.
pub(super) const MAX_WATCH_SECONDS: u64 = 7 * 24 * 3600;

pub(super) fn default_iterations() -> u32 {
    idlevault_crypto::DEFAULT_ITERATIONS
}

pub(super) fn default_numeric_only() -> bool {
    true
}

pub(super) fn default_zstd_level() -> i32 {
    3
}

/// `<cache dir>/idlevault/outbox`, or a temp-dir fallback when the platform
/// has no cache directory.
pub(super) fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("idlevault")
        .join("outbox")
}

pub(super) fn default_log_max_file_mb() -> u64 {
    10
}

pub(super) fn default_log_max_files() -> usize {
    10
}

pub(super) const MAX_LOG_FILE_MB: u64 = 1024;
pub(super) const MAX_LOG_FILES: usize = 100;

/// `<data dir>/idlevault/logs`, falling back like the staging dir.
pub(super) fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("idlevault")
        .join("logs")
}
