pub mod http_util;
pub mod local_backend;
pub mod retry;
pub mod s3_backend;
pub mod uploader;

use std::fmt;

use serde::{Deserialize, Serialize};

use idlevault_types::error::{IdlevaultError, Result};

pub use crate::local_backend::LocalStore;
pub use crate::retry::RetryConfig;
pub use crate::s3_backend::S3Store;
pub use crate::uploader::{UploadJob, UploadReceipt, UploadSettings, Uploader};

const MIB: u64 = 1024 * 1024;
/// S3 caps both a single PUT and one multipart part at 5 GiB.
const MAX_PART_MB: u64 = 5 * 1024;

/// Minimal object store surface needed to deliver one file.
///
/// Implementations issue exactly one request per call; retrying is the
/// [`Uploader`]'s job. Transient failures must be reported as
/// [`IdlevaultError::Transient`] so the uploader can tell them apart.
pub trait ObjectStore: Send + Sync {
    /// Upload `data` to `key`, replacing any existing object.
    fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Start a multipart upload and return its upload ID.
    fn create_multipart(&self, key: &str) -> Result<String>;

    /// Upload one part (numbered from 1) and return its ETag.
    fn upload_part(&self, key: &str, upload_id: &str, part_number: u16, data: &[u8])
        -> Result<String>;

    /// Assemble the uploaded parts, in order, into the object at `key`.
    fn complete_multipart(&self, key: &str, upload_id: &str, etags: &[String]) -> Result<()>;

    /// Discard an unfinished multipart upload.
    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Short human-readable description for logs (`s3://bucket`, `file:///path`).
    fn describe(&self) -> String;
}

/// Remote storage settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// S3 bucket name, or `file:///some/dir` for a local directory target.
    pub bucket: String,
    /// S3 region (default: us-east-1).
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint override for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Falls back to `AWS_ACCESS_KEY_ID`.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY`.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Files larger than this are uploaded in parts.
    #[serde(default = "default_multipart_threshold_mb")]
    pub multipart_threshold_mb: u64,
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_multipart_threshold_mb() -> u64 {
    50
}

fn default_part_size_mb() -> u64 {
    16
}

impl StorageConfig {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            multipart_threshold_mb: default_multipart_threshold_mb(),
            part_size_mb: default_part_size_mb(),
            retry: RetryConfig::default(),
        }
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            multipart_threshold: self.multipart_threshold_mb.saturating_mul(MIB),
            part_size: self.part_size_mb.saturating_mul(MIB),
            retry: self.retry.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(IdlevaultError::Config("storage.bucket must not be empty".into()));
        }
        if self.part_size_mb < 5 {
            return Err(IdlevaultError::Config(format!(
                "storage.part_size_mb must be at least 5 (S3 minimum part size), got {}",
                self.part_size_mb
            )));
        }
        if self.part_size_mb > MAX_PART_MB || self.multipart_threshold_mb > MAX_PART_MB {
            return Err(IdlevaultError::Config(format!(
                "storage.part_size_mb and storage.multipart_threshold_mb must be at most \
                 {MAX_PART_MB} (S3 maximum object part), got {} and {}",
                self.part_size_mb, self.multipart_threshold_mb
            )));
        }
        if self.multipart_threshold_mb < self.part_size_mb {
            return Err(IdlevaultError::Config(format!(
                "storage.multipart_threshold_mb ({}) must not be smaller than part_size_mb ({})",
                self.multipart_threshold_mb, self.part_size_mb
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("multipart_threshold_mb", &self.multipart_threshold_mb)
            .field("part_size_mb", &self.part_size_mb)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Build the object store described by `cfg`.
pub fn store_from_config(cfg: &StorageConfig) -> Result<Box<dyn ObjectStore>> {
    if let Some(path) = cfg.bucket.strip_prefix("file://") {
        return Ok(Box::new(LocalStore::new(path)?));
    }

    let region = cfg.region.as_deref().unwrap_or("us-east-1");
    let access_key_id = credential(cfg.access_key_id.as_deref(), "AWS_ACCESS_KEY_ID")?;
    let secret_access_key =
        credential(cfg.secret_access_key.as_deref(), "AWS_SECRET_ACCESS_KEY")?;

    Ok(Box::new(S3Store::new(
        &cfg.bucket,
        region,
        cfg.endpoint.as_deref(),
        &access_key_id,
        &secret_access_key,
    )?))
}

fn credential(configured: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(value) = configured.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(IdlevaultError::Config(format!(
            "no S3 credentials: set storage.{} or {env_var}",
            env_var.trim_start_matches("AWS_").to_ascii_lowercase()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transfer_thresholds() {
        let cfg = StorageConfig::new("bucket");
        let settings = cfg.upload_settings();
        assert_eq!(settings.multipart_threshold, 50 * MIB);
        assert_eq!(settings.part_size, 16 * MIB);
        assert_eq!(settings.retry.max_retries, 5);
    }

    #[test]
    fn debug_redacts_secret() {
        let mut cfg = StorageConfig::new("bucket");
        cfg.secret_access_key = Some("super-secret".into());
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn validate_rejects_tiny_parts() {
        let mut cfg = StorageConfig::new("bucket");
        cfg.part_size_mb = 1;
        assert!(cfg.validate().is_err());
        cfg.part_size_mb = 16;
        cfg.multipart_threshold_mb = 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_parts() {
        let mut cfg = StorageConfig::new("bucket");
        cfg.part_size_mb = u64::MAX;
        cfg.multipart_threshold_mb = u64::MAX;
        assert!(cfg.validate().is_err());
        // Unvalidated configs still must not overflow.
        assert_eq!(cfg.upload_settings().part_size, u64::MAX);

        cfg.part_size_mb = MAX_PART_MB;
        cfg.multipart_threshold_mb = MAX_PART_MB;
        cfg.validate().unwrap();
    }

    #[test]
    fn file_bucket_builds_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StorageConfig::new(&format!("file://{}", dir.path().display()));
        let store = store_from_config(&cfg).unwrap();
        assert!(store.describe().starts_with("file://"));
    }
}
