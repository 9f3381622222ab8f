//! Per-fingerprint render locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Serializes work on the same fingerprint within one process.
///
/// Two pages that contain the same diagram take turns: the first renders and
/// stores the image, the second finds it in the cache. Different fingerprints
/// never block each other. Locks are dropped from the table once no thread
/// holds or waits on them.
#[derive(Debug, Default)]
pub struct RenderLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RenderLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `fingerprint`.
    pub fn with_lock<T>(&self, fingerprint: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(fingerprint.to_owned()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one held here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            table.remove(fingerprint);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
