use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use walkdir::WalkDir;

use super::walk_error;
use crate::error::{IdlevaultError, Result};

/// Copy `source` into `scratch_root/<base name>`, replacing any stale copy.
///
/// Symlinks are followed; file modification times are carried over so the
/// copy fingerprints like the original. Returns the path of the copy.
pub fn snapshot_copy(source: &Path, scratch_root: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        IdlevaultError::Archive(format!("'{}' has no base name", source.display()))
    })?;
    let dest = scratch_root.join(name);
    if dest.exists() {
        fs::remove_dir_all(&dest)?;
    }
    fs::create_dir_all(&dest)?;

    for entry in WalkDir::new(source).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(source, e))?;
        let rel = relative(source, entry.path())?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| {
                IdlevaultError::Archive(format!(
                    "cannot copy '{}': {e}",
                    entry.path().display()
                ))
            })?;
            let modified = entry.metadata().map_err(|e| walk_error(source, e))?.modified()?;
            fs::File::options()
                .write(true)
                .open(&target)?
                .set_modified(modified)?;
        }
    }
    Ok(dest)
}

/// BLAKE2b-256 over the sorted `(relative path, mtime, size)` of every file
/// under `dir`, hex-encoded. Independent of enumeration order and of file
/// contents beyond size.
pub fn fingerprint(dir: &Path) -> Result<String> {
    let mut records = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|e| walk_error(dir, e))?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let rel = relative(dir, entry.path())?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        records.push((rel, mtime, meta.len()));
    }
    records.sort();

    let mut hasher = Blake2bVar::new(32)
        .map_err(|e| IdlevaultError::Other(format!("blake2b init: {e}")))?;
    for (rel, mtime, size) in &records {
        hasher.update(&(rel.len() as u64).to_le_bytes());
        hasher.update(rel.as_bytes());
        hasher.update(&mtime.to_le_bytes());
        hasher.update(&size.to_le_bytes());
    }
    let mut digest = [0u8; 32];
    hasher
        .finalize_variable(&mut digest)
        .map_err(|e| IdlevaultError::Other(format!("blake2b finalize: {e}")))?;
    Ok(hex::encode(digest))
}

fn relative<'a>(root: &Path, path: &'a Path) -> Result<&'a Path> {
    path.strip_prefix(root).map_err(|_| {
        IdlevaultError::Archive(format!(
            "'{}' is outside '{}'",
            path.display(),
            root.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let ds = dir.path().join("10001");
        fs::create_dir_all(ds.join("sub/deeper")).unwrap();
        fs::write(ds.join("Company.900"), b"ledger").unwrap();
        fs::write(ds.join("sub/a.tsf"), b"aaaa").unwrap();
        fs::write(ds.join("sub/deeper/b.tsf"), b"").unwrap();
        dir
    }

    #[test]
    fn copy_reproduces_tree_and_fingerprint() {
        let src = tree();
        let scratch = tempfile::tempdir().unwrap();
        let ds = src.path().join("10001");

        let copy = snapshot_copy(&ds, scratch.path()).unwrap();
        assert_eq!(copy, scratch.path().join("10001"));
        assert_eq!(fs::read(copy.join("sub/a.tsf")).unwrap(), b"aaaa");
        assert!(copy.join("sub/deeper/b.tsf").is_file());
        assert_eq!(fingerprint(&ds).unwrap(), fingerprint(&copy).unwrap());
    }

    #[test]
    fn stale_copy_is_replaced() {
        let src = tree();
        let scratch = tempfile::tempdir().unwrap();
        let stale = scratch.path().join("10001");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover"), b"old").unwrap();

        let copy = snapshot_copy(&src.path().join("10001"), scratch.path()).unwrap();
        assert!(!copy.join("leftover").exists());
        assert!(copy.join("Company.900").exists());
    }

    #[test]
    fn fingerprint_tracks_size_changes() {
        let src = tree();
        let ds = src.path().join("10001");
        let before = fingerprint(&ds).unwrap();
        assert_eq!(before.len(), 64);
        fs::write(ds.join("sub/a.tsf"), b"aaaaa").unwrap();
        assert_ne!(before, fingerprint(&ds).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_fails_copy() {
        let src = tree();
        let ds = src.path().join("10001");
        std::os::unix::fs::symlink(ds.join("missing"), ds.join("broken")).unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let err = snapshot_copy(&ds, scratch.path()).unwrap_err();
        assert!(matches!(err, IdlevaultError::Archive(_)), "{err}");
    }
}
