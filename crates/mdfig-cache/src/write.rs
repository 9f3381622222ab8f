//! Atomic file writes.
//!
//! Data is written to a temporary file in the destination directory and then
//! renamed over the target. Concurrent writers of the same path race on the
//! rename, and whichever lands last wins with a complete file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `data` to `path` atomically, creating parent directories as needed.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Copy `from` to `to` atomically.
///
/// Skips the copy when `to` already exists with the same length. Destination
/// files are named by content fingerprint, so equal length means equal content
/// in every case except a truncated write, which atomic writes rule out.
pub fn copy_atomic(from: &Path, to: &Path) -> io::Result<()> {
    let source_len = fs::metadata(from)?.len();
    if fs::metadata(to).is_ok_and(|m| m.is_file() && m.len() == source_len) {
        return Ok(());
    }

    let parent = parent_dir(to)?;
    fs::create_dir_all(parent)?;

    let tmp = NamedTempFile::new_in(parent)?;
    fs::copy(from, tmp.path())?;
    tmp.persist(to).map_err(|e| e.error)?;
    Ok(())
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })
}
