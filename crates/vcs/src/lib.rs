//! VCS Abstraction Layer
//!
//! This crate provides a trait-based abstraction over the history of remote
//! repositories, supporting both Git and Mercurial. Each backend keeps a local
//! working copy of one remote and answers history queries by driving the
//! `git` or `hg` executable against it.
//!
//! # Design Goals
//!
//! - **Clean trait interface**: Operations are grouped by concern
//! - **Streaming history**: `log` yields revisions as the tool prints them
//! - **Safe concurrency**: Clones and updates never race queries on the same path
//!
//! # Example
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use vcs::{LogQuery, VcsBackendType, VcsConfig, VcsFactory};
//!
//! # async fn run() -> Result<(), vcs::VcsError> {
//! let config = VcsConfig::new(
//!     VcsBackendType::Git,
//!     "https://github.com/example/repo.git",
//!     "/var/cache/vcs/repo",
//! );
//!
//! let vcs = VcsFactory::create(&config)?;
//! if vcs.is_cloned().await {
//!     vcs.update().await?;
//! } else {
//!     vcs.clone_repo().await?;
//! }
//!
//! let mut log = vcs.log(LogQuery::new().branch("master").limit(10)).await?;
//! while let Some(revision) = log.try_next().await? {
//!     println!("{} {}", revision.id(), revision.subject());
//! }
//! # Ok(())
//! # }
//! ```

mod branch_index;
mod command;
mod error;
mod factory;
mod lock;
mod stream;
mod traits;
mod types;

mod backend;

pub use branch_index::BranchIndex;
pub use command::{RecordReader, VcsCommand, DEFAULT_TIMEOUT};
pub use error::{VcsError, VcsErrorKind};
pub use factory::{VcsBackendType, VcsConfig, VcsFactory};
pub use lock::WorkingCopyLocks;
pub use stream::LogStream;
pub use traits::{VcsBackend, VcsBranches, VcsHistory, VcsWorkingCopy};
pub use types::{LogQuery, Revision, RevisionId, RevisionParts};

#[cfg(feature = "git")]
pub use backend::git::GitBackend;
#[cfg(feature = "hg")]
pub use backend::hg::HgBackend;
