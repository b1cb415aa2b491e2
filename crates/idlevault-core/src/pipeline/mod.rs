//! Snapshot → archive → encrypt → upload, once per dataset.

mod outbox;
mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{info, info_span, warn};
use zeroize::Zeroizing;

use idlevault_crypto::Encryptor;
use idlevault_storage::{UploadJob, Uploader};
use idlevault_types::artifact::ArtifactName;

use crate::archive::{self, ARCHIVE_EXTENSION};
use crate::config::IdlevaultConfig;
use crate::error::{IdlevaultError, Result};

pub use self::outbox::pending_artifacts;
pub use self::report::{DatasetOutcome, DeliveredArtifact, RunReport};

/// Subdirectory of the outbox holding uploaded artifacts kept locally.
pub const DELIVERED_DIR: &str = "delivered";

/// Everything the pipeline needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub client_id: String,
    /// Outbox for encrypted artifacts; also hosts per-run scratch space.
    pub staging_dir: PathBuf,
    pub keep_uploaded: bool,
    pub numeric_only: bool,
    pub zstd_level: i32,
}

impl PipelineSettings {
    pub fn from_config(config: &IdlevaultConfig) -> Self {
        Self {
            client_id: config.client_id.trim().to_string(),
            staging_dir: config.pipeline.staging_dir(),
            keep_uploaded: config.pipeline.keep_uploaded,
            numeric_only: config.pipeline.numeric_only,
            zstd_level: config.pipeline.zstd_level,
        }
    }
}

pub struct BackupPipeline {
    settings: PipelineSettings,
    encryptor: Encryptor,
    passphrase: Zeroizing<String>,
    uploader: Uploader,
    span: tracing::Span,
}

impl BackupPipeline {
    pub fn new(
        settings: PipelineSettings,
        encryptor: Encryptor,
        passphrase: Zeroizing<String>,
        uploader: Uploader,
        span: tracing::Span,
    ) -> Self {
        Self {
            settings,
            encryptor,
            passphrase,
            uploader,
            span,
        }
    }

    /// Back up every dataset under `root`.
    ///
    /// Per-dataset failures are recorded in the report and never abort the
    /// run; only an unreadable `root` or staging directory is an error.
    /// `cancel` is checked between datasets.
    pub fn run(&self, root: &Path, cancel: &AtomicBool) -> Result<RunReport> {
        let _enter = self.span.enter();
        let started = Instant::now();

        let datasets = list_datasets(root, self.settings.numeric_only)?;
        fs::create_dir_all(&self.settings.staging_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(".scratch-")
            .tempdir_in(&self.settings.staging_dir)?;

        let mut report = RunReport {
            redelivered: self.redeliver_outbox(cancel),
            ..RunReport::default()
        };
        info!(root = %root.display(), datasets = datasets.len(), "backup run started");

        for dataset in &datasets {
            if cancel.load(Ordering::SeqCst) {
                report.interrupted = true;
                info!("shutdown requested, stopping before next dataset");
                break;
            }
            let name = dataset_name(dataset);
            let span = info_span!("dataset", dataset = %name);
            let _ds = span.enter();

            let result = self.process_dataset(dataset, &name, scratch.path());
            match &result {
                Ok(delivered) => info!(
                    key = %delivered.key,
                    fingerprint = %delivered.fingerprint,
                    bytes = delivered.bytes,
                    "dataset backed up"
                ),
                Err(e) => warn!(error = %e, "dataset backup failed"),
            }
            report.datasets.push(DatasetOutcome {
                name,
                result: result.map_err(|e| e.to_string()),
            });
        }

        report.elapsed = started.elapsed();
        if report.failed() > 0 {
            warn!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                failed_datasets = ?report.failed_names(),
                "backup run finished with failures"
            );
        } else {
            info!(
                succeeded = report.succeeded(),
                redelivered = report.redelivered,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "backup run finished"
            );
        }
        Ok(report)
    }

    fn process_dataset(
        &self,
        dataset: &Path,
        name: &str,
        scratch: &Path,
    ) -> Result<DeliveredArtifact> {
        let copy = archive::snapshot_copy(dataset, scratch)?;
        let fingerprint = archive::fingerprint(&copy)?;
        info!(%fingerprint, "snapshot taken");

        let archive_path = scratch.join(format!("{name}.{ARCHIVE_EXTENSION}"));
        let archived = archive::archive(&copy, &archive_path, self.settings.zstd_level);
        let _ = fs::remove_dir_all(&copy);
        archived?;

        let artifact = ArtifactName::now(name);
        let blob_path = self.settings.staging_dir.join(artifact.file_name());
        let encrypted =
            self.encryptor
                .encrypt_file(&archive_path, &blob_path, self.passphrase.as_bytes());
        let _ = fs::remove_file(&archive_path);
        let bytes = encrypted?;

        let key = artifact.remote_key(&self.settings.client_id);
        let artifact = self.deliver(&blob_path, &key)?;

        Ok(DeliveredArtifact {
            artifact,
            key,
            fingerprint,
            bytes,
        })
    }

    /// Upload one blob, then take it out of the outbox: deleted, or moved to
    /// `delivered/` when `keep_uploaded` is set. A failed upload leaves the
    /// blob where it is. Returns the blob's final local path.
    fn deliver(&self, blob: &Path, key: &str) -> Result<PathBuf> {
        self.uploader.upload(&UploadJob::new(blob, key))?;

        if !self.settings.keep_uploaded {
            if let Err(e) = fs::remove_file(blob) {
                warn!(artifact = %blob.display(), error = %e, "could not remove uploaded artifact");
            }
            return Ok(blob.to_path_buf());
        }

        let kept_dir = self.settings.staging_dir.join(DELIVERED_DIR);
        let kept = match blob.file_name() {
            Some(file_name) => kept_dir.join(file_name),
            None => return Ok(blob.to_path_buf()),
        };
        match fs::create_dir_all(&kept_dir).and_then(|()| fs::rename(blob, &kept)) {
            Ok(()) => Ok(kept),
            Err(e) => {
                warn!(artifact = %blob.display(), error = %e, "could not move uploaded artifact out of the outbox");
                Ok(blob.to_path_buf())
            }
        }
    }

    /// Retry uploads left in the outbox by earlier runs. Returns how many
    /// were delivered.
    fn redeliver_outbox(&self, cancel: &AtomicBool) -> usize {
        let pending = match pending_artifacts(&self.settings.staging_dir) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "cannot scan outbox");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        info!(count = pending.len(), "re-delivering outbox artifacts");
        let mut delivered = 0;
        for (path, artifact) in pending {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let key = artifact.remote_key(&self.settings.client_id);
            match self.deliver(&path, &key) {
                Ok(_) => delivered += 1,
                Err(e) => warn!(
                    artifact = %path.display(),
                    error = %e,
                    "outbox re-delivery failed, keeping artifact"
                ),
            }
        }
        delivered
    }
}

/// Immediate subdirectories of `root` that count as datasets, sorted by name.
pub fn list_datasets(root: &Path, numeric_only: bool) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            IdlevaultError::DataRootNotFound(root.display().to_string())
        }
        _ => IdlevaultError::Io(e),
    })?;

    let mut datasets = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if numeric_only && !is_numeric_name(&name) {
            continue;
        }
        datasets.push(path);
    }
    datasets.sort();
    Ok(datasets)
}

pub fn is_numeric_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn dataset_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
