//! Mercurial backend implementation for VCS abstraction layer

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tracing::{debug, info, warn};

use crate::command::{VcsCommand, DEFAULT_TIMEOUT};
use crate::error::{ResultExt, VcsError};
use crate::factory::{VcsBackendType, VcsConfig};
use crate::lock::WorkingCopyLocks;
use crate::stream::{LogRecord, LogStream, RecordParser};
use crate::traits::*;
use crate::types::{format_signature, LogQuery, Revision, RevisionId, RevisionParts};

const FIELD_SEP: char = '\x01';

/// node, author name/email/date, both parents, branch, description; NUL-terminated
const LOG_TEMPLATE: &str = r"{node}\x01{author|person}\x01{author|email}\x01{date|rfc3339date}\x01{p1node}\x01{p2node}\x01{branch}\x01{desc}\x00";

const NULL_NODE: &str = "0000000000000000000000000000000000000000";

const DEFAULT_BRANCH: &str = "default";

/// Mercurial implementation of VCS backend
///
/// Mercurial records a single branch name per changeset, so revisions report
/// only the branch they were committed on.
pub struct HgBackend {
    url: String,
    path: PathBuf,
    hg: VcsCommand,
    default_branch: String,
    locks: &'static WorkingCopyLocks,
}

impl HgBackend {
    pub fn new(url: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::with_timeout(url, path, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, path: impl AsRef<Path>, timeout: Duration) -> Self {
        let path = path.as_ref();
        Self {
            url: url.into(),
            path: std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
            hg: VcsCommand::hg(timeout),
            default_branch: DEFAULT_BRANCH.to_string(),
            locks: WorkingCopyLocks::global(),
        }
    }

    pub fn from_config(config: &VcsConfig) -> Self {
        let mut backend = Self::with_timeout(&config.url, &config.path, config.command_timeout);
        if let Some(branch) = &config.default_branch {
            backend.default_branch = branch.clone();
        }
        backend
    }

    fn has_store(&self) -> bool {
        self.path.join(".hg").is_dir()
    }

    fn ensure_cloned(&self) -> Result<(), VcsError> {
        if self.has_store() {
            Ok(())
        } else {
            Err(VcsError::repo_unavailable(&self.path))
        }
    }

    async fn resolve_node(&self, reference: &str) -> Result<RevisionId, VcsError> {
        self.lookup_node(reference)
            .await?
            .ok_or_else(|| VcsError::InvalidQuery(format!("unknown revision {reference:?}")))
    }

    /// Like `resolve_node`, but a well-formed reference that names nothing is `None`
    async fn lookup_node(&self, reference: &str) -> Result<Option<RevisionId>, VcsError> {
        if reference.is_empty() || reference.starts_with('-') {
            return Err(VcsError::InvalidQuery(format!("invalid revision {reference:?}")));
        }
        let revset = format!("present({})", quote_revset(reference));
        let stdout = self
            .hg
            .run(
                &self.path,
                ["log", "-r", revset.as_str(), "-l", "1", "--template", "{node}"],
            )
            .await?;
        let node = stdout.trim();
        if node.is_empty() {
            return Ok(None);
        }
        RevisionId::parse(node)
            .map(Some)
            .map_err(|_| VcsError::parse("hg log", format!("unexpected node {node:?}")))
    }

    async fn branch_names(&self) -> Result<BTreeSet<String>, VcsError> {
        let stdout = self
            .hg
            .run(&self.path, ["branches", "--closed", "--template", "{branch}\\n"])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn clone_impl(&self) -> Result<(), VcsError> {
        let _guard = self.locks.write(&self.path).await;

        if self.has_store() {
            warn!(path = %self.path.display(), "Mercurial working copy already present, skipping clone");
            return Ok(());
        }
        if let Ok(mut entries) = tokio::fs::read_dir(&self.path).await {
            if entries.next_entry().await?.is_some() {
                return Err(VcsError::RepositoryUnavailable(format!(
                    "{} exists and is not an empty directory",
                    self.path.display()
                )));
            }
        }

        let parent = self.path.parent().unwrap_or_else(|| Path::new("/"));
        tokio::fs::create_dir_all(parent).await?;

        info!(url = %self.url, path = %self.path.display(), "Cloning mercurial repository");
        let args: [&OsStr; 5] = [
            OsStr::new("clone"),
            OsStr::new("--noupdate"),
            OsStr::new("--"),
            OsStr::new(&self.url),
            self.path.as_os_str(),
        ];
        self.hg.run(parent, args).await?;
        Ok(())
    }

    async fn update_impl(&self) -> Result<(), VcsError> {
        let _guard = self.locks.write(&self.path).await;
        self.ensure_cloned()?;

        info!(url = %self.url, path = %self.path.display(), "Pulling mercurial repository");
        self.hg.run(&self.path, ["pull"]).await?;
        Ok(())
    }

    async fn log_impl(&self, query: LogQuery) -> Result<LogStream, VcsError> {
        query.validate()?;
        debug!(?query, path = %self.path.display(), "Querying mercurial history");

        let guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let revset = match (&query.parent, &query.branch) {
            (Some(parent), _) => {
                let node = self.resolve_node(parent).await?;
                format!("sort(ancestors({node}), -date)")
            }
            (None, Some(branch)) => {
                if !self.branch_names().await?.contains(branch) {
                    return Err(VcsError::InvalidQuery(format!("unknown branch {branch:?}")));
                }
                format!(
                    "sort(ancestors(heads(branch({}))), -date)",
                    quote_revset(branch)
                )
            }
            (None, None) => "sort(all(), -date)".to_string(),
        };
        if query.limit == Some(0) {
            return Ok(LogStream::empty());
        }

        let reader = self
            .hg
            .spawn_records(
                &self.path,
                ["log", "-r", revset.as_str(), "--template", LOG_TEMPLATE],
                b'\0',
            )
            .await?;
        let parse: RecordParser = Box::new(|command: &str, raw: Vec<u8>| parse_log_record(command, &raw));
        Ok(LogStream::from_reader(reader, parse, query, guard))
    }

    async fn export_impl(&self, revision: &str) -> Result<String, VcsError> {
        let _guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let node = self.resolve_node(revision).await?;
        self.hg
            .run(&self.path, ["diff", "--git", "-c", node.as_str()])
            .await
    }

    async fn is_child_parent_impl(&self, child: &str, parent: &str) -> Result<bool, VcsError> {
        let _guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let child = self.lookup_node(child).await?;
        let parent = self.lookup_node(parent).await?;
        let (Some(child), Some(parent)) = (child, parent) else {
            return Ok(false);
        };
        if child == parent {
            return Ok(false);
        }

        let revset = format!("{parent} and ancestors({child}) and not {child}");
        let stdout = self
            .hg
            .run(&self.path, ["log", "-r", revset.as_str(), "--template", "{node}\\n"])
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn known_branches_impl(&self) -> Result<BTreeSet<String>, VcsError> {
        let _guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;
        self.branch_names().await
    }
}

/// Quote `value` as a revset string literal
fn quote_revset(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn parse_log_record(command: &str, raw: &[u8]) -> Result<Option<LogRecord>, VcsError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| VcsError::parse(command, format!("record is not UTF-8: {e}")))?;
    let text = text.strip_prefix('\n').unwrap_or(text);
    if text.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = text.splitn(8, FIELD_SEP).collect();
    let &[node, name, email, date, p1, p2, branch, message] = fields.as_slice() else {
        return Err(VcsError::parse(
            command,
            format!("expected 8 fields, got {} in {text:?}", fields.len()),
        ));
    };

    let date = DateTime::parse_from_rfc3339(date)
        .map_err(|e| VcsError::parse(command, format!("bad date {date:?}: {e}")))?;
    let parents = [p1, p2]
        .into_iter()
        .filter(|p| !p.is_empty() && *p != NULL_NODE)
        .map(String::from)
        .collect();
    let signature = format_signature(name, email);

    let revision = Revision::new(RevisionParts {
        id: node.to_string(),
        message: message.to_string(),
        author: signature.clone(),
        committer: signature,
        author_date: date,
        committer_date: date,
        parents,
        branches: vec![branch.to_string()],
    })
    .map_err(|e| VcsError::parse(command, e.to_string()))?;

    Ok(Some(LogRecord {
        author_name: name.to_string(),
        author_email: email.to_string(),
        revision,
    }))
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl VcsWorkingCopy for HgBackend {
    fn remote_url(&self) -> &str {
        &self.url
    }

    fn work_dir(&self) -> &Path {
        &self.path
    }

    async fn clone_repo(&self) -> Result<(), VcsError> {
        self.clone_impl().await.with_operation("clone", &self.path)
    }

    async fn update(&self) -> Result<(), VcsError> {
        self.update_impl().await.with_operation("update", &self.path)
    }

    async fn is_cloned(&self) -> bool {
        self.has_store()
    }
}

#[async_trait]
impl VcsHistory for HgBackend {
    async fn log(&self, query: LogQuery) -> Result<LogStream, VcsError> {
        self.log_impl(query).await.with_operation("log", &self.path)
    }

    async fn export(&self, revision: &str) -> Result<String, VcsError> {
        self.export_impl(revision)
            .await
            .with_operation("export", &self.path)
    }

    async fn is_child_parent(&self, child: &str, parent: &str) -> Result<bool, VcsError> {
        self.is_child_parent_impl(child, parent)
            .await
            .with_operation("is_child_parent", &self.path)
    }
}

#[async_trait]
impl VcsBranches for HgBackend {
    async fn get_default_revision(&self) -> Result<String, VcsError> {
        Ok(self.default_branch.clone())
    }

    async fn get_known_branches(&self) -> Result<BTreeSet<String>, VcsError> {
        self.known_branches_impl()
            .await
            .with_operation("get_known_branches", &self.path)
    }
}

impl VcsBackend for HgBackend {
    fn backend_type(&self) -> VcsBackendType {
        VcsBackendType::Hg
    }
}
