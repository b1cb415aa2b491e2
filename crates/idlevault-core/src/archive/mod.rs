//! Snapshot copies and single-file compressed archives of one dataset.
//!
//! An archive is a zstd-compressed tar stream whose only top-level entry is
//! the source directory's base name. Entries are added in sorted path order,
//! so the same tree always produces the same entry sequence.

mod snapshot;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{IdlevaultError, Result};

pub use self::snapshot::{fingerprint, snapshot_copy};

/// Extension used for archives in the staging directory.
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: u64,
    pub dirs: u64,
    /// Uncompressed bytes of file content.
    pub bytes: u64,
    /// Size of the archive file written.
    pub compressed_bytes: u64,
}

/// Write `source_dir` into `out_file` as a zstd-compressed tar archive.
///
/// Symlinks are followed. On error the partial output file is removed.
pub fn archive(source_dir: &Path, out_file: &Path, zstd_level: i32) -> Result<ArchiveStats> {
    let base = base_name(source_dir)?;
    if !source_dir.is_dir() {
        return Err(IdlevaultError::Archive(format!(
            "'{}' is not a directory",
            source_dir.display()
        )));
    }

    match write_archive(source_dir, &base, out_file, zstd_level) {
        Ok(stats) => {
            debug!(
                source = %source_dir.display(),
                archive = %out_file.display(),
                files = stats.files,
                bytes = stats.bytes,
                compressed_bytes = stats.compressed_bytes,
                "archive written"
            );
            Ok(stats)
        }
        Err(e) => {
            let _ = std::fs::remove_file(out_file);
            Err(e)
        }
    }
}

fn write_archive(
    source_dir: &Path,
    base: &Path,
    out_file: &Path,
    zstd_level: i32,
) -> Result<ArchiveStats> {
    let file = File::create(out_file)?;
    let encoder = zstd::stream::Encoder::new(BufWriter::new(file), zstd_level)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);

    let mut stats = ArchiveStats::default();
    for entry in WalkDir::new(source_dir)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(source_dir, e))?;
        let rel = entry.path().strip_prefix(source_dir).map_err(|_| {
            IdlevaultError::Archive(format!(
                "'{}' escaped '{}'",
                entry.path().display(),
                source_dir.display()
            ))
        })?;
        let name = if rel.as_os_str().is_empty() {
            base.to_path_buf()
        } else {
            base.join(rel)
        };

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
            stats.dirs += 1;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), &name)?;
            stats.files += 1;
            stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| IdlevaultError::Io(e.into_error()))?;
    file.sync_all()?;
    stats.compressed_bytes = file.metadata()?.len();
    Ok(stats)
}

/// Unpack an archive produced by [`archive`] into `dest`, returning the path
/// of the top-level directory it contained.
pub fn extract(archive_file: &Path, dest: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest)?;
    let decoder = zstd::stream::Decoder::new(File::open(archive_file)?)?;
    let mut tar = tar::Archive::new(decoder);

    let mut top: Option<PathBuf> = None;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if let Some(first) = path.components().next() {
            top.get_or_insert_with(|| PathBuf::from(first.as_os_str()));
        }
        // unpack_in refuses entries that would land outside `dest`.
        if !entry.unpack_in(dest)? {
            return Err(IdlevaultError::Archive(format!(
                "refusing unsafe entry '{}' in '{}'",
                path.display(),
                archive_file.display()
            )));
        }
    }

    top.map(|t| dest.join(t)).ok_or_else(|| {
        IdlevaultError::Archive(format!("'{}' is empty", archive_file.display()))
    })
}

fn base_name(dir: &Path) -> Result<PathBuf> {
    dir.file_name().map(PathBuf::from).ok_or_else(|| {
        IdlevaultError::Archive(format!("'{}' has no base name", dir.display()))
    })
}

pub(crate) fn walk_error(root: &Path, e: walkdir::Error) -> IdlevaultError {
    let at = e
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| root.display().to_string());
    IdlevaultError::Archive(format!("cannot read '{at}': {e}"))
}
