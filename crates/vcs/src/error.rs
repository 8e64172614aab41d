use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during VCS operations
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    BackendTimeout { command: String, timeout: Duration },

    #[error("Unparseable output from `{command}`: {reason}")]
    ParseError { command: String, reason: String },

    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{0} executable not found on PATH")]
    NotInstalled(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed for {}: {source}", path.display())]
    Operation {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: Box<VcsError>,
    },
}

/// Coarse classification of a [`VcsError`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsErrorKind {
    InvalidQuery,
    RepositoryUnavailable,
    BackendTimeout,
    ParseError,
    Other,
}

impl VcsError {
    /// Create a RepositoryUnavailable error from a path
    pub fn repo_unavailable(path: &Path) -> Self {
        Self::RepositoryUnavailable(format!("{} is not a valid working copy", path.display()))
    }

    pub fn parse(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy bucket of this error, looking through `Operation` wrappers.
    pub fn kind(&self) -> VcsErrorKind {
        match self {
            Self::InvalidQuery(_) => VcsErrorKind::InvalidQuery,
            Self::RepositoryUnavailable(_) => VcsErrorKind::RepositoryUnavailable,
            Self::BackendTimeout { .. } => VcsErrorKind::BackendTimeout,
            Self::ParseError { .. } => VcsErrorKind::ParseError,
            Self::Operation { source, .. } => source.kind(),
            Self::InvalidConfig(_)
            | Self::CommandFailed { .. }
            | Self::NotInstalled(_)
            | Self::Io(_) => VcsErrorKind::Other,
        }
    }

    /// Attach the failing operation and working-copy path.
    ///
    /// Already-wrapped errors are returned unchanged so context is never nested.
    pub fn context(self, operation: &'static str, path: &Path) -> Self {
        match self {
            Self::Operation { .. } => self,
            source => Self::Operation {
                operation,
                path: path.to_path_buf(),
                source: Box::new(source),
            },
        }
    }
}

pub(crate) trait ResultExt<T> {
    fn with_operation(self, operation: &'static str, path: &Path) -> Result<T, VcsError>;
}

impl<T> ResultExt<T> for Result<T, VcsError> {
    fn with_operation(self, operation: &'static str, path: &Path) -> Result<T, VcsError> {
        self.map_err(|e| e.context(operation, path))
    }
}
