use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use idlevault_types::error::IdlevaultError;

/// Retry settings for remote uploads.
///
/// The delay before retry `n` (1-based) is `retry_delay_ms * 2^n` plus a
/// jitter in `[0, jitter_ms)`, capped at `retry_max_delay_ms`. With the
/// defaults that is `2^n` seconds plus under one second of jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_jitter_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Delay to wait before retry number `attempt` (1-based).
///
/// Non-decreasing in `attempt` for a fixed config: the exponential part at
/// least doubles while the jitter stays below one base step.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.min(32);
    let base = config.retry_delay_ms.saturating_mul(1u64 << exp);
    let jitter = if config.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..config.jitter_ms.min(config.retry_delay_ms.max(1)))
    };
    Duration::from_millis(base.saturating_add(jitter).min(config.retry_max_delay_ms))
}

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}

/// Whether an upload error should be retried.
///
/// Only network/service failures are; authentication, not-found and local
/// file errors are not.
pub fn is_transient(err: &IdlevaultError) -> bool {
    match err {
        IdlevaultError::Transient(_) => true,
        IdlevaultError::Io(e) => is_retryable_io(e),
        _ => false,
    }
}
