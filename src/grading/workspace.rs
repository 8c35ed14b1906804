//! Per-push workspaces and the locks that keep two runs off the same one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::OwnedMutexGuard;

/// Filesystem location holding one fetched submission.
///
/// Derived from the owner login and the short commit hash, so different
/// commits never share a path while a repeated push of the same commit reuses
/// (and replaces) the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspacePath(PathBuf);

impl WorkspacePath {
    pub fn new(submissions_dir: &Path, owner: &str, short_commit: &str) -> Self {
        Self(submissions_dir.join(format!("{}_{}", owner, short_commit)))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// Delete the workspace and everything in it. Returns `Ok(false)` when
    /// there was nothing to delete.
    pub async fn remove(&self) -> std::io::Result<bool> {
        match tokio::fs::remove_dir_all(&self.0).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Held for the whole lifetime of a run on one workspace path.
pub struct WorkspaceGuard {
    _guard: OwnedMutexGuard<()>,
}

/// One async mutex per workspace path currently in use.
///
/// Entries are weak so a path's lock disappears once no run holds or waits
/// for it.
#[derive(Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run owns `workspace`, then own it.
    pub async fn acquire(&self, workspace: &WorkspacePath) -> WorkspaceGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(workspace.path()).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(workspace.path().to_path_buf(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        WorkspaceGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of paths with a live lock.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
