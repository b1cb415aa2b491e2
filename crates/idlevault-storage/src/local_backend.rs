use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use rand::RngCore;

use idlevault_types::error::{IdlevaultError, Result};

use crate::ObjectStore;

/// Directory holding in-progress multipart uploads, relative to the root.
const MULTIPART_DIR: &str = ".multipart";

/// Object store backed by a local directory (`file://` buckets).
///
/// Object keys map to `/`-separated paths under the root. Writes go through a
/// temp file and an atomic rename, so readers never see a partial object.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &str) -> Result<Self> {
        let root = PathBuf::from(root);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root: fs::canonicalize(&root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject storage keys that could escape the root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(IdlevaultError::Storage("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.starts_with('\\') || key.contains('\\') {
            return Err(IdlevaultError::Storage(format!(
                "unsafe storage key: '{key}'"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(IdlevaultError::Storage(format!(
                "unsafe storage key: non-normal path component in '{key}'"
            )));
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn upload_dir(&self, upload_id: &str) -> Result<PathBuf> {
        if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdlevaultError::Storage(format!(
                "unknown multipart upload '{upload_id}'"
            )));
        }
        Ok(self.root.join(MULTIPART_DIR).join(upload_id))
    }

    fn part_path(dir: &Path, part_number: u16) -> PathBuf {
        dir.join(format!("{part_number:05}.part"))
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        self.atomic_write(&path, data)
    }

    fn create_multipart(&self, key: &str) -> Result<String> {
        Self::validate_key(key)?;
        let mut raw = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut raw);
        let upload_id = hex::encode(raw);
        fs::create_dir_all(self.upload_dir(&upload_id)?)?;
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u16,
        data: &[u8],
    ) -> Result<String> {
        Self::validate_key(key)?;
        let dir = self.upload_dir(upload_id)?;
        if !dir.is_dir() {
            return Err(IdlevaultError::Storage(format!(
                "unknown multipart upload '{upload_id}' for '{key}'"
            )));
        }
        let path = Self::part_path(&dir, part_number);
        self.atomic_write(&path, data)?;
        Ok(format!("\"{part_number:05}-{}\"", data.len()))
    }

    fn complete_multipart(&self, key: &str, upload_id: &str, etags: &[String]) -> Result<()> {
        let target = self.resolve(key)?;
        let dir = self.upload_dir(upload_id)?;
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut assembled = tempfile::NamedTempFile::new_in(parent)?;
        for (idx, etag) in etags.iter().enumerate() {
            let part_number = u16::try_from(idx + 1).map_err(|_| {
                IdlevaultError::Storage(format!("too many parts for '{key}'"))
            })?;
            let path = Self::part_path(&dir, part_number);
            let data = fs::read(&path).map_err(|e| {
                IdlevaultError::Storage(format!(
                    "missing part {part_number} ({etag}) for '{key}': {e}"
                ))
            })?;
            assembled.write_all(&data)?;
        }
        assembled.as_file().sync_all()?;
        assembled.persist(&target).map_err(|e| e.error)?;
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        let dir = self.upload_dir(upload_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_creates_nested_keys_and_overwrites() {
        let (_dir, store) = store();
        store.put_object("acme/10001/2024/05/a.enc", b"one").unwrap();
        store.put_object("acme/10001/2024/05/a.enc", b"two").unwrap();
        let path = store.root().join("acme/10001/2024/05/a.enc");
        assert_eq!(fs::read(path).unwrap(), b"two");
    }

    #[test]
    fn rejects_escaping_keys() {
        let (_dir, store) = store();
        for key in ["", "/abs", "../up", "a/../../b", "a\\b", "./a"] {
            assert!(store.put_object(key, b"x").is_err(), "{key} accepted");
        }
    }

    #[test]
    fn multipart_assembles_in_order() {
        let (_dir, store) = store();
        let id = store.create_multipart("k/obj").unwrap();
        let e1 = store.upload_part("k/obj", &id, 1, b"hello ").unwrap();
        let e2 = store.upload_part("k/obj", &id, 2, b"world").unwrap();
        store.complete_multipart("k/obj", &id, &[e1, e2]).unwrap();
        assert_eq!(fs::read(store.root().join("k/obj")).unwrap(), b"hello world");
        assert!(!store.root().join(MULTIPART_DIR).join(&id).exists());
    }

    #[test]
    fn abort_discards_parts() {
        let (_dir, store) = store();
        let id = store.create_multipart("k/obj").unwrap();
        store.upload_part("k/obj", &id, 1, b"data").unwrap();
        store.abort_multipart("k/obj", &id).unwrap();
        assert!(store.upload_part("k/obj", &id, 2, b"more").is_err());
        assert!(!store.root().join("k/obj").exists());
    }

    #[test]
    fn unknown_upload_id_rejected() {
        let (_dir, store) = store();
        assert!(store.upload_part("k", "../../etc", 1, b"x").is_err());
        assert!(store.upload_part("k", "abcdef", 1, b"x").is_err());
    }
}
