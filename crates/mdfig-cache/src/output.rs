//! Store used when caching is disabled.

use std::io;
use std::path::{Path, PathBuf};

use crate::write::write_atomic;
use crate::{CacheEntry, ImageStore, image_path};

/// Non-retaining [`ImageStore`] that writes straight to the output directory.
///
/// Every `lookup` misses, so every diagram is re-rendered. `put` still
/// persists the image, but only where the site expects it; nothing is kept
/// in a separate cache root.
#[derive(Debug)]
pub struct OutputStore {
    output_dir: PathBuf,
}

impl OutputStore {
    /// Create a store writing into `output_dir`.
    #[must_use]
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

impl ImageStore for OutputStore {
    fn lookup(&self, _fingerprint: &str) -> Option<PathBuf> {
        None
    }

    fn put(&self, fingerprint: &str, image: &[u8], extension: &str) -> io::Result<PathBuf> {
        let path = image_path(&self.output_dir, fingerprint, extension);
        write_atomic(&path, image)?;
        Ok(path)
    }

    fn entries(&self) -> io::Result<Vec<CacheEntry>> {
        Ok(Vec::new())
    }

    fn remove(&self, _fingerprint: &str) -> io::Result<usize> {
        Ok(0)
    }

    fn root(&self) -> &Path {
        &self.output_dir
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
