use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use idlevault_types::error::{IdlevaultError, Result};

use crate::retry::{backoff_delay, is_transient, RetryConfig};
use crate::ObjectStore;

/// S3 rejects multipart uploads with more parts than this.
const MAX_PARTS: u64 = 10_000;

type SleepFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// Transfer tuning, derived from [`crate::StorageConfig::upload_settings`].
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Files strictly larger than this many bytes go through multipart.
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub retry: RetryConfig,
}

/// One file to deliver. Carries no state between attempts.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub path: PathBuf,
    pub key: String,
}

impl UploadJob {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub bytes: u64,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
    /// Parts used; 0 for a single PUT.
    pub parts: usize,
}

/// Delivers local files to an [`ObjectStore`], retrying whole attempts on
/// transient failures.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    settings: UploadSettings,
    sleep: SleepFn,
    span: tracing::Span,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, settings: UploadSettings, span: tracing::Span) -> Self {
        Self {
            store,
            settings,
            sleep: Arc::new(std::thread::sleep),
            span,
        }
    }

    /// Replace the backoff sleep (tests record delays instead of waiting).
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    /// Upload `job.path` to `job.key`, overwriting any existing object.
    ///
    /// Makes at most `max_retries + 1` attempts. A permanent failure returns
    /// immediately; running out of attempts returns
    /// [`IdlevaultError::UploadExhausted`] wrapping the last error.
    pub fn upload(&self, job: &UploadJob) -> Result<UploadReceipt> {
        let _enter = self.span.enter();
        let max_retries = self.settings.retry.max_retries;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.attempt(job) {
                Ok((bytes, parts)) => {
                    info!(
                        key = %job.key,
                        bytes,
                        parts,
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "upload complete"
                    );
                    return Ok(UploadReceipt {
                        key: job.key.clone(),
                        bytes,
                        attempts: attempt,
                        parts,
                    });
                }
                Err(e) if !is_transient(&e) => {
                    warn!(key = %job.key, error = %e, "upload failed permanently");
                    return Err(e);
                }
                Err(e) if attempt > max_retries => {
                    warn!(key = %job.key, attempts = attempt, error = %e, "upload retries exhausted");
                    return Err(IdlevaultError::UploadExhausted {
                        key: job.key.clone(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(&self.settings.retry, attempt);
                    warn!(
                        key = %job.key,
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient upload error, retrying"
                    );
                    (self.sleep)(delay);
                }
            }
        }
    }

    fn attempt(&self, job: &UploadJob) -> Result<(u64, usize)> {
        let mut file = File::open(&job.path)?;
        let size = file.metadata()?.len();

        if size <= self.settings.multipart_threshold {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data)?;
            self.store.put_object(&job.key, &data)?;
            return Ok((data.len() as u64, 0));
        }

        let part_size = effective_part_size(size, self.settings.part_size);
        let upload_id = self.store.create_multipart(&job.key)?;
        debug!(key = %job.key, %upload_id, size, part_size, "multipart upload started");

        match self.send_parts(&mut file, job, &upload_id, size, part_size) {
            Ok(parts) => Ok((size, parts)),
            Err(e) => {
                if let Err(abort_err) = self.store.abort_multipart(&job.key, &upload_id) {
                    warn!(key = %job.key, %upload_id, error = %abort_err, "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    fn send_parts(
        &self,
        file: &mut File,
        job: &UploadJob,
        upload_id: &str,
        size: u64,
        part_size: u64,
    ) -> Result<usize> {
        let mut etags = Vec::new();
        let mut offset = 0u64;
        let mut buf = Vec::with_capacity(part_size as usize);

        while offset < size {
            let part_number = u16::try_from(etags.len() + 1).map_err(|_| {
                IdlevaultError::Storage(format!("too many parts for '{}'", job.key))
            })?;
            let len = part_size.min(size - offset);
            buf.clear();
            file.seek(SeekFrom::Start(offset))?;
            (&mut *file).take(len).read_to_end(&mut buf)?;
            if buf.len() as u64 != len {
                return Err(IdlevaultError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("'{}' shrank during upload", job.path.display()),
                )));
            }
            let etag = self
                .store
                .upload_part(&job.key, upload_id, part_number, &buf)?;
            etags.push(etag);
            offset += len;
        }

        self.store.complete_multipart(&job.key, upload_id, &etags)?;
        Ok(etags.len())
    }
}

/// Part size actually used for a file of `size` bytes: the configured size,
/// grown if needed to stay within the service's part-count limit.
pub fn effective_part_size(size: u64, configured: u64) -> u64 {
    configured.max(1).max(size.div_ceil(MAX_PARTS))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory store that fails the first `failures` requests.
    #[derive(Default)]
    struct FlakyStore {
        failures: AtomicU32,
        permanent: bool,
        calls: AtomicU32,
        objects: Mutex<HashMap<String, Vec<u8>>>,
        parts: Mutex<HashMap<String, Vec<(u16, Vec<u8>)>>>,
        aborted: AtomicU32,
        part_failures: AtomicU32,
    }

    impl FlakyStore {
        fn failing(n: u32) -> Self {
            Self {
                failures: AtomicU32::new(n),
                ..Self::default()
            }
        }

        fn maybe_fail(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures.store(left - 1, Ordering::SeqCst);
            if self.permanent {
                Err(IdlevaultError::Storage("HTTP 403: AccessDenied".into()))
            } else {
                Err(IdlevaultError::Transient("HTTP 503: SlowDown".into()))
            }
        }
    }

    impl ObjectStore for FlakyStore {
        fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
            self.maybe_fail()?;
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
            Ok(())
        }

        fn create_multipart(&self, _key: &str) -> Result<String> {
            self.maybe_fail()?;
            let id = format!("up-{}", self.calls.load(Ordering::SeqCst));
            self.parts.lock().unwrap().insert(id.clone(), Vec::new());
            Ok(id)
        }

        fn upload_part(&self, _key: &str, upload_id: &str, n: u16, data: &[u8]) -> Result<String> {
            self.maybe_fail()?;
            if n == 2 && self.part_failures.load(Ordering::SeqCst) > 0 {
                self.part_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(IdlevaultError::Transient("connection reset".into()));
            }
            let mut parts = self.parts.lock().unwrap();
            let list = parts
                .get_mut(upload_id)
                .ok_or_else(|| IdlevaultError::Storage("no such upload".into()))?;
            list.push((n, data.to_vec()));
            Ok(format!("\"etag-{n}\""))
        }

        fn complete_multipart(&self, key: &str, upload_id: &str, etags: &[String]) -> Result<()> {
            self.maybe_fail()?;
            let list = self
                .parts
                .lock()
                .unwrap()
                .remove(upload_id)
                .ok_or_else(|| IdlevaultError::Storage("no such upload".into()))?;
            assert_eq!(list.len(), etags.len());
            let mut data = Vec::new();
            for (idx, (n, chunk)) in list.into_iter().enumerate() {
                assert_eq!(n as usize, idx + 1);
                data.extend_from_slice(&chunk);
            }
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
            self.aborted.fetch_add(1, Ordering::SeqCst);
            self.parts.lock().unwrap().remove(upload_id);
            Ok(())
        }

        fn describe(&self) -> String {
            "memory://flaky".into()
        }
    }

    fn settings(max_retries: u32) -> UploadSettings {
        UploadSettings {
            multipart_threshold: 1024,
            part_size: 100,
            retry: RetryConfig {
                max_retries,
                ..RetryConfig::default()
            },
        }
    }

    fn file_with(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        (f, data)
    }

    fn recording_uploader(
        store: Arc<FlakyStore>,
        settings: UploadSettings,
    ) -> (Uploader, Arc<Mutex<Vec<Duration>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delays);
        let uploader = Uploader::new(store, settings, tracing::Span::none())
            .with_sleep(move |d| sink.lock().unwrap().push(d));
        (uploader, delays)
    }

    #[test]
    fn succeeds_on_fourth_attempt_with_growing_delays() {
        let store = Arc::new(FlakyStore::failing(3));
        let (uploader, delays) = recording_uploader(Arc::clone(&store), settings(5));
        let (file, data) = file_with(10);

        let receipt = uploader
            .upload(&UploadJob::new(file.path(), "acme/10001/2024/05/a.enc"))
            .unwrap();
        assert_eq!(receipt.attempts, 4);
        assert_eq!(receipt.parts, 0);

        let delays = delays.lock().unwrap();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");
        assert!(delays[0] >= Duration::from_secs(2));
        assert_eq!(
            store.objects.lock().unwrap()["acme/10001/2024/05/a.enc"],
            data
        );
    }

    #[test]
    fn gives_up_after_max_retries_plus_one_attempts() {
        let store = Arc::new(FlakyStore::failing(6));
        let (uploader, delays) = recording_uploader(Arc::clone(&store), settings(5));
        let (file, _) = file_with(10);

        let err = uploader
            .upload(&UploadJob::new(file.path(), "k"))
            .unwrap_err();
        match err {
            IdlevaultError::UploadExhausted { attempts, .. } => assert_eq!(attempts, 6),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 6);
        assert_eq!(delays.lock().unwrap().len(), 5);
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let store = Arc::new(FlakyStore {
            failures: AtomicU32::new(1),
            permanent: true,
            ..FlakyStore::default()
        });
        let (uploader, delays) = recording_uploader(Arc::clone(&store), settings(5));
        let (file, _) = file_with(10);

        let err = uploader
            .upload(&UploadJob::new(file.path(), "k"))
            .unwrap_err();
        assert!(matches!(err, IdlevaultError::Storage(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert!(delays.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_not_retried() {
        let store = Arc::new(FlakyStore::default());
        let (uploader, delays) = recording_uploader(Arc::clone(&store), settings(5));
        let dir = tempfile::tempdir().unwrap();

        let err = uploader
            .upload(&UploadJob::new(dir.path().join("gone.enc"), "k"))
            .unwrap_err();
        assert!(matches!(err, IdlevaultError::Io(_)));
        assert!(delays.lock().unwrap().is_empty());
    }

    #[test]
    fn large_file_goes_multipart_in_order() {
        let store = Arc::new(FlakyStore::default());
        let (uploader, _) = recording_uploader(Arc::clone(&store), settings(5));
        let (file, data) = file_with(1050);

        let receipt = uploader
            .upload(&UploadJob::new(file.path(), "big"))
            .unwrap();
        assert_eq!(receipt.parts, 11);
        assert_eq!(receipt.bytes, 1050);
        assert_eq!(store.objects.lock().unwrap()["big"], data);
    }

    #[test]
    fn failed_multipart_attempt_is_aborted_then_retried() {
        let store = Arc::new(FlakyStore {
            part_failures: AtomicU32::new(1),
            ..FlakyStore::default()
        });
        let (uploader, delays) = recording_uploader(Arc::clone(&store), settings(5));
        let (file, data) = file_with(2000);

        let receipt = uploader
            .upload(&UploadJob::new(file.path(), "big"))
            .unwrap();
        assert_eq!(receipt.attempts, 2);
        assert_eq!(store.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(delays.lock().unwrap().len(), 1);
        assert!(store.parts.lock().unwrap().is_empty());
        assert_eq!(store.objects.lock().unwrap()["big"], data);
    }

    #[test]
    fn part_size_grows_for_huge_files() {
        assert_eq!(effective_part_size(100, 16), 16);
        assert_eq!(effective_part_size(10_000 * 16 + 1, 16), 17);
    }
}
