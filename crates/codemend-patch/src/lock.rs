//! Per-file locking for patch application.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Per-file async mutexes. Two patches to the same path never overlap;
/// patches to different paths do not wait on each other.
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`. Access ends when the guard drops.
    ///
    /// Entries nobody holds or waits on are dropped here, so the map only
    /// grows with the number of files locked at the same time.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}
