use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;

use crate::error::VcsError;
use crate::factory::VcsBackendType;
use crate::stream::LogStream;
use crate::types::LogQuery;

/// Working-copy lifecycle
///
/// A backend is bound to one remote URL and one local path for its whole
/// lifetime. The working copy on disk outlives the backend value.
#[async_trait]
pub trait VcsWorkingCopy: Send + Sync {
    /// Remote the working copy is cloned from
    fn remote_url(&self) -> &str;

    /// Local path of the working copy
    fn work_dir(&self) -> &Path;

    /// Materialize a fresh working copy from the remote.
    ///
    /// Serialized against every other mutating call on the same path.
    async fn clone_repo(&self) -> Result<(), VcsError>;

    /// Fetch new history into an existing working copy.
    ///
    /// Succeeds when there is nothing new to fetch.
    async fn update(&self) -> Result<(), VcsError>;

    /// Whether `work_dir` currently holds a usable working copy
    async fn is_cloned(&self) -> bool;
}

/// Read-only history queries
#[async_trait]
pub trait VcsHistory: VcsWorkingCopy {
    /// Revisions matching `query`, most recent first.
    ///
    /// Fails with `InvalidQuery` before running anything when both `parent`
    /// and `branch` are set.
    async fn log(&self, query: LogQuery) -> Result<LogStream, VcsError>;

    /// Unified diff introducing `revision` relative to its first parent
    async fn export(&self, revision: &str) -> Result<String, VcsError>;

    /// True iff `parent` is a strict ancestor of `child`
    async fn is_child_parent(&self, child: &str, parent: &str) -> Result<bool, VcsError>;
}

/// Branch topology
#[async_trait]
pub trait VcsBranches: VcsWorkingCopy {
    /// Name of the primary branch; never touches the network
    async fn get_default_revision(&self) -> Result<String, VcsError>;

    /// Every branch known to the working copy as of the last update
    async fn get_known_branches(&self) -> Result<BTreeSet<String>, VcsError>;
}

/// Combined trait representing a full VCS backend
///
/// This is the interface callers hold; concrete backends stay behind it.
pub trait VcsBackend: VcsWorkingCopy + VcsHistory + VcsBranches {
    /// Get backend type
    fn backend_type(&self) -> VcsBackendType;

    /// Get a human-readable description of this backend
    fn description(&self) -> String {
        format!(
            "{:?} backend for {} at {}",
            self.backend_type(),
            self.remote_url(),
            self.work_dir().display()
        )
    }
}
