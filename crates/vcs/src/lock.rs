//! Path-keyed reader/writer locks guarding working copies.
//!
//! `clone`/`update` take the write side for the working copy they mutate;
//! history queries take the read side, so they never observe a half-written
//! copy while still running alongside each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

static GLOBAL: LazyLock<WorkingCopyLocks> = LazyLock::new(WorkingCopyLocks::new);

#[derive(Default)]
pub struct WorkingCopyLocks {
    /// One lock per working copy; entries are never removed
    locks: RwLock<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl WorkingCopyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every backend in this process
    pub fn global() -> &'static WorkingCopyLocks {
        &GLOBAL
    }

    async fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        let key = normalize(path);
        if let Some(lock) = self.locks.read().await.get(&key) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Exclusive access for a mutating operation on `path`
    pub async fn write(&self, path: &Path) -> OwnedRwLockWriteGuard<()> {
        let lock = self.lock_for(path).await;
        trace!(path = %path.display(), "acquiring working copy write lock");
        lock.write_owned().await
    }

    /// Shared access for a read-only operation on `path`
    pub async fn read(&self, path: &Path) -> OwnedRwLockReadGuard<()> {
        let lock = self.lock_for(path).await;
        trace!(path = %path.display(), "acquiring working copy read lock");
        lock.read_owned().await
    }

    /// Number of distinct working copies seen so far
    pub async fn tracked(&self) -> usize {
        self.locks.read().await.len()
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
