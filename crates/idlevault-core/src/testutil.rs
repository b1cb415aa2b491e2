use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zeroize::Zeroizing;

use idlevault_crypto::Encryptor;
use idlevault_storage::{ObjectStore, RetryConfig, UploadSettings, Uploader};
use idlevault_types::error::{IdlevaultError, Result};

use crate::monitor::{ProcessLookupError, ProcessTable};
use crate::pipeline::{BackupPipeline, PipelineSettings};

pub const TEST_PASSPHRASE: &str = "correct horse battery staple";
pub const TEST_ITERATIONS: u32 = 1_000;

/// In-memory object store. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    uploads: Mutex<HashMap<String, BTreeMap<u16, Vec<u8>>>>,
    /// Keys containing any of these substrings fail with a transient error.
    failing: Mutex<Vec<String>>,
    puts: Mutex<u32>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_keys_containing(&self, needle: &str) {
        self.failing.lock().unwrap().push(needle.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn put_count(&self) -> u32 {
        *self.puts.lock().unwrap()
    }

    fn check(&self, key: &str) -> Result<()> {
        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|needle| key.contains(needle.as_str())) {
            return Err(IdlevaultError::Transient(format!("injected failure for {key}")));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        *self.puts.lock().unwrap() += 1;
        self.check(key)?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn create_multipart(&self, key: &str) -> Result<String> {
        self.check(key)?;
        let id = format!("{:x}", self.uploads.lock().unwrap().len() + 1);
        self.uploads
            .lock()
            .unwrap()
            .insert(id.clone(), BTreeMap::new());
        Ok(id)
    }

    fn upload_part(&self, key: &str, upload_id: &str, part_number: u16, data: &[u8]) -> Result<String> {
        self.check(key)?;
        let mut uploads = self.uploads.lock().unwrap();
        let parts = uploads
            .get_mut(upload_id)
            .ok_or_else(|| IdlevaultError::Storage(format!("no upload {upload_id}")))?;
        parts.insert(part_number, data.to_vec());
        Ok(format!("etag-{part_number}"))
    }

    fn complete_multipart(&self, key: &str, upload_id: &str, _etags: &[String]) -> Result<()> {
        self.check(key)?;
        let parts = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| IdlevaultError::Storage(format!("no upload {upload_id}")))?;
        let data: Vec<u8> = parts.into_values().flatten().collect();
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".into()
    }
}

/// Process table whose contents tests can change while a monitor polls it.
#[derive(Clone, Default)]
pub struct FakeProcessTable {
    names: Arc<Mutex<Vec<String>>>,
    polls: Arc<Mutex<u32>>,
}

impl FakeProcessTable {
    pub fn with(names: &[&str]) -> Self {
        let table = Self::default();
        table.set(names);
        table
    }

    pub fn set(&self, names: &[&str]) {
        *self.names.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn polls(&self) -> u32 {
        *self.polls.lock().unwrap()
    }
}

impl ProcessTable for FakeProcessTable {
    fn entries(&mut self) -> Vec<std::result::Result<String, ProcessLookupError>> {
        *self.polls.lock().unwrap() += 1;
        let mut entries: Vec<_> = self
            .names
            .lock()
            .unwrap()
            .iter()
            .map(|n| Ok(n.clone()))
            .collect();
        entries.push(Err(ProcessLookupError("pid 4: access denied".into())));
        entries
    }
}

/// Retry policy with no real waiting.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        retry_delay_ms: 1,
        retry_max_delay_ms: 2,
        jitter_ms: 0,
    }
}

pub fn test_uploader(store: Arc<dyn ObjectStore>, max_retries: u32) -> Uploader {
    Uploader::new(
        store,
        UploadSettings {
            multipart_threshold: 1 << 20,
            part_size: 64 * 1024,
            retry: fast_retry(max_retries),
        },
        tracing::Span::none(),
    )
    .with_sleep(|_| {})
}

pub fn test_pipeline(store: Arc<dyn ObjectStore>, staging: &Path) -> BackupPipeline {
    test_pipeline_with(store, staging, false)
}

pub fn test_pipeline_with(
    store: Arc<dyn ObjectStore>,
    staging: &Path,
    keep_uploaded: bool,
) -> BackupPipeline {
    BackupPipeline::new(
        PipelineSettings {
            client_id: "acme".into(),
            staging_dir: staging.to_path_buf(),
            keep_uploaded,
            numeric_only: true,
            zstd_level: 1,
        },
        Encryptor::new(TEST_ITERATIONS),
        Zeroizing::new(TEST_PASSPHRASE.to_string()),
        test_uploader(store, 1),
        tracing::Span::none(),
    )
}

/// Create `<root>/<name>/` with a couple of files.
pub fn make_dataset(root: &Path, name: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join("sub")).unwrap();
    std::fs::write(dir.join("Company.900"), format!("company {name}")).unwrap();
    std::fs::write(dir.join("sub").join("Tran.900"), vec![b'x'; 4096]).unwrap();
}

/// Log sink for `tracing_subscriber::fmt().with_writer(..)`.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Run `f` with a subscriber writing into this capture.
    pub fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn short(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
