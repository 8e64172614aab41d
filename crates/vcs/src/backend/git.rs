//! Git backend implementation for VCS abstraction layer
//!
//! Drives the `git` executable against a mirror clone of the remote, so every
//! remote branch is a local `refs/heads/*` ref and `HEAD` tracks the remote's
//! default branch.

use std::collections::{BTreeSet, HashMap};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tracing::{debug, info, warn};

use crate::branch_index::{parse_branch_tips, parse_parent_line, BranchIndex};
use crate::command::{VcsCommand, DEFAULT_TIMEOUT};
use crate::error::{ResultExt, VcsError};
use crate::factory::{is_bare_git_dir, VcsBackendType, VcsConfig};
use crate::lock::WorkingCopyLocks;
use crate::stream::{LogRecord, LogStream, RecordParser};
use crate::traits::*;
use crate::types::{format_signature, LogQuery, Revision, RevisionId, RevisionParts};

/// `git hash-object -t tree /dev/null`; diff base for root commits
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

const FIELD_SEP: char = '\x01';

/// id, author name/email/date, committer name/email/date, parents, raw message
const LOG_FORMAT: &str = "--format=%H%x01%an%x01%ae%x01%aI%x01%cn%x01%ce%x01%cI%x01%P%x01%B";

const DEFAULT_BRANCH: &str = "master";

/// Git implementation of VCS backend
pub struct GitBackend {
    url: String,
    path: PathBuf,
    git: VcsCommand,
    default_branch: String,
    locks: &'static WorkingCopyLocks,
}

impl GitBackend {
    pub fn new(url: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::with_timeout(url, path, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, path: impl AsRef<Path>, timeout: Duration) -> Self {
        let path = path.as_ref();
        Self {
            url: url.into(),
            path: std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
            git: VcsCommand::git(timeout),
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

    fn ensure_cloned(&self) -> Result<(), VcsError> {
        if is_bare_git_dir(&self.path) {
            Ok(())
        } else {
            Err(VcsError::repo_unavailable(&self.path))
        }
    }

    /// Resolve any revision reference to a full commit id
    async fn resolve_commit(&self, reference: &str) -> Result<RevisionId, VcsError> {
        self.lookup_commit(reference)
            .await?
            .ok_or_else(|| VcsError::InvalidQuery(format!("unknown revision {reference:?}")))
    }

    /// Like `resolve_commit`, but a well-formed reference that names nothing is `None`
    async fn lookup_commit(&self, reference: &str) -> Result<Option<RevisionId>, VcsError> {
        if reference.is_empty() || reference.starts_with('-') {
            return Err(VcsError::InvalidQuery(format!("invalid revision {reference:?}")));
        }
        let rev = format!("{reference}^{{commit}}");
        let (code, stdout) = self
            .git
            .run_status(&self.path, ["rev-parse", "--verify", "--quiet", rev.as_str()])
            .await?;
        if code != 0 {
            return Ok(None);
        }
        RevisionId::parse(stdout.trim())
            .map(Some)
            .map_err(|_| VcsError::parse("git rev-parse", format!("unexpected output {stdout:?}")))
    }

    /// Branch `HEAD` points at, if it is symbolic
    async fn symbolic_head(&self) -> Result<Option<String>, VcsError> {
        let (code, stdout) = self
            .git
            .run_status(&self.path, ["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await?;
        let name = stdout.trim();
        Ok((code == 0 && !name.is_empty()).then(|| name.to_string()))
    }

    async fn branch_index(&self) -> Result<BranchIndex, VcsError> {
        let command = "git for-each-ref";
        let refs = self
            .git
            .run(
                &self.path,
                ["for-each-ref", "--format=%(objectname) %(refname:lstrip=2)", "refs/heads/"],
            )
            .await?;
        let tips = parse_branch_tips(command, &refs)?;
        if tips.is_empty() {
            return Ok(BranchIndex::default());
        }

        let mut reader = self
            .git
            .spawn_records(&self.path, ["rev-list", "--parents", "--branches"], b'\n')
            .await?;
        let mut graph = HashMap::new();
        while let Some(line) = reader.next_record().await? {
            let line = std::str::from_utf8(&line)
                .map_err(|e| VcsError::parse(reader.command(), e.to_string()))?;
            if let Some((id, parents)) = parse_parent_line(reader.command(), line)? {
                graph.insert(id, parents);
            }
        }
        let default = self.symbolic_head().await?;
        let index = BranchIndex::build(&graph, &tips, default.as_deref());
        debug!(
            branches = tips.len(),
            revisions = index.len(),
            "Built git branch index"
        );
        Ok(index)
    }

    async fn clone_impl(&self) -> Result<(), VcsError> {
        let _guard = self.locks.write(&self.path).await;

        if is_bare_git_dir(&self.path) {
            warn!(path = %self.path.display(), "Git working copy already present, skipping clone");
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

        info!(url = %self.url, path = %self.path.display(), "Cloning git mirror");
        let args: [&OsStr; 5] = [
            OsStr::new("clone"),
            OsStr::new("--mirror"),
            OsStr::new("--"),
            OsStr::new(&self.url),
            self.path.as_os_str(),
        ];
        self.git.run(parent, args).await?;
        Ok(())
    }

    async fn update_impl(&self) -> Result<(), VcsError> {
        let _guard = self.locks.write(&self.path).await;
        self.ensure_cloned()?;

        info!(url = %self.url, path = %self.path.display(), "Fetching git mirror");
        self.git.run(&self.path, ["fetch", "--prune", "--all"]).await?;
        Ok(())
    }

    async fn log_impl(&self, query: LogQuery) -> Result<LogStream, VcsError> {
        query.validate()?;
        debug!(?query, path = %self.path.display(), "Querying git history");

        let guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let mut args: Vec<OsString> = ["log", "-z", "--date-order", LOG_FORMAT]
            .into_iter()
            .map(OsString::from)
            .collect();
        match (&query.parent, &query.branch) {
            (Some(parent), _) => {
                args.push(self.resolve_commit(parent).await?.to_string().into());
            }
            (None, Some(branch)) => {
                let tip = self
                    .resolve_commit(&format!("refs/heads/{branch}"))
                    .await
                    .map_err(|e| match e {
                        VcsError::InvalidQuery(_) => {
                            VcsError::InvalidQuery(format!("unknown branch {branch:?}"))
                        }
                        other => other,
                    })?;
                args.push(tip.to_string().into());
            }
            (None, None) => args.push("--branches".into()),
        }
        args.push("--".into());

        let index = self.branch_index().await?;
        if index.is_empty() || query.limit == Some(0) {
            return Ok(LogStream::empty());
        }

        let reader = self.git.spawn_records(&self.path, args, b'\0').await?;
        let parse: RecordParser =
            Box::new(move |command: &str, raw: Vec<u8>| parse_log_record(command, &raw, &index));
        Ok(LogStream::from_reader(reader, parse, query, guard))
    }

    async fn export_impl(&self, revision: &str) -> Result<String, VcsError> {
        let _guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let id = self.resolve_commit(revision).await?;
        let line = self
            .git
            .run(&self.path, ["rev-list", "--parents", "-n", "1", id.as_str()])
            .await?;
        let mut ids = line.split_whitespace();
        if ids.next() != Some(id.as_str()) {
            return Err(VcsError::parse(
                "git rev-list --parents",
                format!("expected {id} first, got {line:?}"),
            ));
        }
        let base = ids.next().unwrap_or(EMPTY_TREE);

        self.git
            .run(
                &self.path,
                ["diff", "--no-color", "--no-ext-diff", base, id.as_str()],
            )
            .await
    }

    async fn is_child_parent_impl(&self, child: &str, parent: &str) -> Result<bool, VcsError> {
        let _guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let child = self.lookup_commit(child).await?;
        let parent = self.lookup_commit(parent).await?;
        let (Some(child), Some(parent)) = (child, parent) else {
            return Ok(false);
        };
        if child == parent {
            return Ok(false);
        }

        let (code, _) = self
            .git
            .run_status(
                &self.path,
                ["merge-base", "--is-ancestor", parent.as_str(), child.as_str()],
            )
            .await?;
        match code {
            0 => Ok(true),
            1 => Ok(false),
            other => Err(VcsError::parse(
                "git merge-base --is-ancestor",
                format!("unexpected exit code {other}"),
            )),
        }
    }

    async fn known_branches_impl(&self) -> Result<BTreeSet<String>, VcsError> {
        let _guard = self.locks.read(&self.path).await;
        self.ensure_cloned()?;

        let stdout = self
            .git
            .run(
                &self.path,
                ["for-each-ref", "--format=%(refname:lstrip=2)", "refs/heads/"],
            )
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn default_revision_impl(&self) -> Result<String, VcsError> {
        if is_bare_git_dir(&self.path) {
            let _guard = self.locks.read(&self.path).await;
            if let Some(branch) = self.symbolic_head().await? {
                return Ok(branch);
            }
        }
        Ok(self.default_branch.clone())
    }
}

/// Parse one `LOG_FORMAT` record; `None` when no known branch contains it
fn parse_log_record(
    command: &str,
    raw: &[u8],
    index: &BranchIndex,
) -> Result<Option<LogRecord>, VcsError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| VcsError::parse(command, format!("record is not UTF-8: {e}")))?;
    let text = text.strip_prefix('\n').unwrap_or(text);
    if text.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = text.splitn(9, FIELD_SEP).collect();
    let &[id, author_name, author_email, author_date, committer_name, committer_email, committer_date, parents, message] =
        fields.as_slice()
    else {
        return Err(VcsError::parse(
            command,
            format!("expected 9 fields, got {} in {text:?}", fields.len()),
        ));
    };

    let id = RevisionId::parse(id).map_err(|e| VcsError::parse(command, e.to_string()))?;
    let branches = index.branches_of(&id);
    if branches.is_empty() {
        return Ok(None);
    }

    let date = |value: &str| {
        DateTime::parse_from_rfc3339(value)
            .map_err(|e| VcsError::parse(command, format!("bad date {value:?}: {e}")))
    };
    let revision = Revision::new(RevisionParts {
        id: id.to_string(),
        message: message.to_string(),
        author: format_signature(author_name, author_email),
        committer: format_signature(committer_name, committer_email),
        author_date: date(author_date)?,
        committer_date: date(committer_date)?,
        parents: parents.split_whitespace().map(String::from).collect(),
        branches: branches.to_vec(),
    })
    .map_err(|e| VcsError::parse(command, e.to_string()))?;

    Ok(Some(LogRecord {
        author_name: author_name.to_string(),
        author_email: author_email.to_string(),
        revision,
    }))
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl VcsWorkingCopy for GitBackend {
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
        is_bare_git_dir(&self.path)
    }
}

#[async_trait]
impl VcsHistory for GitBackend {
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
impl VcsBranches for GitBackend {
    async fn get_default_revision(&self) -> Result<String, VcsError> {
        self.default_revision_impl()
            .await
            .with_operation("get_default_revision", &self.path)
    }

    async fn get_known_branches(&self) -> Result<BTreeSet<String>, VcsError> {
        self.known_branches_impl()
            .await
            .with_operation("get_known_branches", &self.path)
    }
}

impl VcsBackend for GitBackend {
    fn backend_type(&self) -> VcsBackendType {
        VcsBackendType::Git
    }
}
