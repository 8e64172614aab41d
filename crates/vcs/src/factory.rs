use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::command::DEFAULT_TIMEOUT;
use crate::error::VcsError;
use crate::traits::VcsBackend;

/// Type of VCS backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsBackendType {
    Git,
    #[serde(alias = "mercurial")]
    Hg,
}

/// Configuration for VCS backend
#[derive(Debug, Clone, Deserialize)]
pub struct VcsConfig {
    #[serde(rename = "backend")]
    pub backend_type: VcsBackendType,
    /// Remote repository URL
    pub url: String,
    /// Local working copy path
    pub path: PathBuf,
    /// Upper bound for any single external command, in seconds
    #[serde(default = "default_timeout", deserialize_with = "duration_from_seconds")]
    pub command_timeout: Duration,
    /// Reported as the default revision before the first clone
    #[serde(default)]
    pub default_branch: Option<String>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    if secs == 0 {
        return Err(serde::de::Error::custom("command_timeout must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

impl VcsConfig {
    pub fn new(backend_type: VcsBackendType, url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            backend_type,
            url: url.into(),
            path: path.into(),
            command_timeout: DEFAULT_TIMEOUT,
            default_branch: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    /// Parse a TOML document with `backend`, `url` and `path` keys
    pub fn from_toml_str(s: &str) -> Result<Self, VcsError> {
        toml::from_str(s).map_err(|e| VcsError::InvalidConfig(e.to_string()))
    }
}

/// Whether `path` has the layout of a bare (or mirror) git repository
pub(crate) fn is_bare_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}

/// Factory for creating VCS backends
pub struct VcsFactory;

impl VcsFactory {
    /// Create a backend based on configuration
    pub fn create(config: &VcsConfig) -> Result<Box<dyn VcsBackend>, VcsError> {
        if config.url.is_empty() {
            return Err(VcsError::InvalidConfig("remote url must not be empty".into()));
        }

        match config.backend_type {
            #[cfg(feature = "git")]
            VcsBackendType::Git => Ok(Box::new(crate::backend::git::GitBackend::from_config(config))),
            #[cfg(feature = "hg")]
            VcsBackendType::Hg => Ok(Box::new(crate::backend::hg::HgBackend::from_config(config))),
            #[allow(unreachable_patterns)]
            other => Err(VcsError::InvalidConfig(format!(
                "{other:?} backend not enabled in this build"
            ))),
        }
    }

    /// Auto-detect backend from an existing working copy
    pub fn detect(path: &Path) -> Result<VcsBackendType, VcsError> {
        if path.join(".hg").is_dir() {
            Ok(VcsBackendType::Hg)
        } else if path.join(".git").exists() || is_bare_git_dir(path) {
            Ok(VcsBackendType::Git)
        } else {
            Err(VcsError::repo_unavailable(path))
        }
    }

    /// Create a backend by auto-detecting the type of an existing working copy
    pub fn auto_detect(url: &str, path: &Path) -> Result<Box<dyn VcsBackend>, VcsError> {
        let backend_type = Self::detect(path)?;
        Self::create(&VcsConfig::new(backend_type, url, path))
    }
}
