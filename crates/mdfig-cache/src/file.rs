//! File-based image cache.
//!
//! [`FileImageCache`] stores each rendered image as a plain file named after
//! its fingerprint:
//!
//! ```text
//! {root}/
//! +-- VERSION                # cache layout version
//! +-- 3f78...e2a1.png        # one file per fingerprint
//! +-- 9c0d...41b7.svg
//! ```
//!
//! On open, the `VERSION` file is validated. If it is missing or different,
//! every recognized image file is removed before the new version is written.
//! Files that do not look like cache entries are left alone, so pointing the
//! cache at a shared directory never deletes foreign data.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::write::write_atomic;
use crate::{CacheEntry, IMAGE_EXTENSIONS, ImageStore, find_image, image_path, is_fingerprint};

/// Cache layout version. Bump when the fingerprint scheme changes.
pub const CACHE_VERSION: &str = "1";

/// Persistent [`ImageStore`] rooted at a directory on disk.
#[derive(Debug)]
pub struct FileImageCache {
    root: PathBuf,
}

impl FileImageCache {
    /// Open the cache at `root`, creating it and validating its version.
    ///
    /// Fails when the directory cannot be created or written to. Callers
    /// treat that as "caching unavailable for this run".
    pub fn open(root: PathBuf) -> io::Result<Self> {
        validate_version(&root, CACHE_VERSION)?;
        Ok(Self { root })
    }
}

impl ImageStore for FileImageCache {
    fn lookup(&self, fingerprint: &str) -> Option<PathBuf> {
        find_image(&self.root, fingerprint)
    }

    fn put(&self, fingerprint: &str, image: &[u8], extension: &str) -> io::Result<PathBuf> {
        let path = image_path(&self.root, fingerprint, extension);
        write_atomic(&path, image)?;
        tracing::debug!(fingerprint, path = %path.display(), "stored image in cache");
        Ok(path)
    }

    fn entries(&self) -> io::Result<Vec<CacheEntry>> {
        read_entries(&self.root)
    }

    fn remove(&self, fingerprint: &str) -> io::Result<usize> {
        let mut removed = 0;
        for ext in IMAGE_EXTENSIONS {
            match fs::remove_file(image_path(&self.root, fingerprint, ext)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

/// List the cache entries under `root` without opening the cache.
///
/// Unlike [`FileImageCache::open`] this never writes or wipes anything, and
/// a missing directory is an empty cache.
pub fn read_entries(root: &Path) -> io::Result<Vec<CacheEntry>> {
    let read_dir = match fs::read_dir(root) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        let Some(fingerprint) = entry_fingerprint(&path) else {
            continue;
        };
        let metadata = dir_entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let created_at = metadata.created().or_else(|_| metadata.modified())?;
        entries.push(CacheEntry {
            fingerprint: fingerprint.to_owned(),
            image_path: path,
            created_at,
        });
    }
    entries.sort_by(|a, b| a.image_path.cmp(&b.image_path));
    Ok(entries)
}

/// Fingerprint of a cache file path, if it follows the `{hex}.{ext}` layout.
fn entry_fingerprint(path: &Path) -> Option<&str> {
    let ext = path.extension()?.to_str()?;
    if !IMAGE_EXTENSIONS.contains(&ext) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    is_fingerprint(stem).then_some(stem)
}

/// Validate the cache version, clearing cache entries on mismatch.
fn validate_version(root: &Path, version: &str) -> io::Result<()> {
    let version_file = root.join("VERSION");

    match fs::read_to_string(&version_file) {
        Ok(stored) if stored == version => {
            tracing::debug!("cache version matches: {version}");
            return Ok(());
        }
        Ok(stored) => {
            tracing::info!(
                "cache version mismatch (stored={stored}, current={version}), clearing cache"
            );
        }
        Err(_) => {
            tracing::info!("no cache VERSION file found, initializing cache");
        }
    }

    fs::create_dir_all(root)?;
    for dir_entry in fs::read_dir(root)?.filter_map(Result::ok) {
        let path = dir_entry.path();
        if entry_fingerprint(&path).is_some()
            && let Err(e) = fs::remove_file(&path)
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove stale cache entry");
        }
    }
    write_atomic(&version_file, version.as_bytes())
}
