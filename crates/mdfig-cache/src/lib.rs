//! Content-addressed image cache for mdfig.
//!
//! Rendered diagram images are stored as `{root}/{fingerprint}.{ext}`. The
//! fingerprint is computed by the caller; this crate only cares that it is a
//! filesystem-safe hex string.
//!
//! - [`ImageStore`]: Lookup/put/enumerate/remove contract shared by all stores
//! - [`FileImageCache`]: Persistent store rooted at the cache directory
//! - [`OutputStore`]: Cache-disabled mode (always misses, writes straight to
//!   the output directory)
//! - [`RenderLocks`]: Per-fingerprint locks so concurrent pages render a
//!   diagram at most once per process
//!
//! All writes go through a temporary file in the destination directory
//! followed by a rename, so readers never observe a partially written image.
//!
//! # Example
//!
//! ```
//! use mdfig_cache::{FileImageCache, ImageStore};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = FileImageCache::open(dir.path().join("cache")).unwrap();
//!
//! let fp = "3f786850e387550fdab836ed7e6dc881de23001b";
//! assert!(cache.lookup(fp).is_none());
//!
//! let path = cache.put(fp, b"<svg/>", "svg").unwrap();
//! assert_eq!(cache.lookup(fp), Some(path));
//! ```

mod file;
mod locks;
mod output;
mod write;

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use file::{FileImageCache, read_entries};
pub use locks::RenderLocks;
pub use output::OutputStore;
pub use write::{copy_atomic, write_atomic};

/// Image file extensions a store will look for on lookup and enumeration.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "svg"];

/// A cached image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Fingerprint the image was stored under (the file stem).
    pub fingerprint: String,
    /// Absolute path of the image file.
    pub image_path: PathBuf,
    /// Creation time reported by the filesystem (modification time where
    /// creation time is unavailable).
    pub created_at: SystemTime,
}

/// Storage for rendered images keyed by fingerprint.
///
/// Implementations must be thread-safe: one store is shared by every page of
/// a build, possibly processed in parallel.
pub trait ImageStore: Send + Sync {
    /// Return the stored image for `fingerprint`, if its file still exists.
    ///
    /// A file that was removed externally, or that is empty, is a miss.
    fn lookup(&self, fingerprint: &str) -> Option<PathBuf>;

    /// Store `image` under `{fingerprint}.{extension}` and return its path.
    ///
    /// Calling `put` again with the same fingerprint overwrites the previous
    /// file atomically.
    fn put(&self, fingerprint: &str, image: &[u8], extension: &str) -> io::Result<PathBuf>;

    /// List every cached image.
    fn entries(&self) -> io::Result<Vec<CacheEntry>>;

    /// Delete all files stored under `fingerprint`. Returns how many were removed.
    fn remove(&self, fingerprint: &str) -> io::Result<usize>;

    /// Directory images are written into.
    fn root(&self) -> &Path;

    /// Whether images are retained separately from the output directory.
    fn is_persistent(&self) -> bool;
}

/// Whether `stem` looks like a fingerprint (non-empty lowercase hex).
fn is_fingerprint(stem: &str) -> bool {
    !stem.is_empty() && stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Path of `{root}/{fingerprint}.{extension}`.
fn image_path(root: &Path, fingerprint: &str, extension: &str) -> PathBuf {
    root.join(format!("{fingerprint}.{extension}"))
}

/// Find a non-empty image file for `fingerprint` under `root`.
fn find_image(root: &Path, fingerprint: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| image_path(root, fingerprint, ext))
        .find(|path| path.metadata().is_ok_and(|m| m.is_file() && m.len() > 0))
}
