use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};
use std::hash::{Hash, Hasher};

use crate::error::VcsError;

/// Full-length, content-addressed revision identifier (40 hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub const LEN: usize = 40;

    /// Validate and normalize (to lowercase) a revision id.
    pub fn parse(id: &str) -> Result<Self, VcsError> {
        if id.len() != Self::LEN || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VcsError::InvalidQuery(format!(
                "revision id must be {} hex characters, got {:?}",
                Self::LEN,
                id
            )));
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for RevisionId {
    type Error = VcsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// Raw fields of a revision as parsed from backend output
#[derive(Debug, Clone)]
pub struct RevisionParts {
    pub id: String,
    pub message: String,
    pub author: String,
    pub committer: String,
    pub author_date: DateTime<FixedOffset>,
    pub committer_date: DateTime<FixedOffset>,
    pub parents: Vec<String>,
    pub branches: Vec<String>,
}

/// One immutable point in version history.
///
/// Two revisions are equal when their ids are equal.
#[derive(Debug, Clone, Serialize)]
pub struct Revision {
    id: RevisionId,
    message: String,
    subject: String,
    author: String,
    committer: String,
    #[serde(serialize_with = "rfc3339")]
    author_date: DateTime<FixedOffset>,
    #[serde(serialize_with = "rfc3339")]
    committer_date: DateTime<FixedOffset>,
    parents: Vec<RevisionId>,
    branches: Vec<String>,
}

impl Revision {
    pub fn new(parts: RevisionParts) -> Result<Self, VcsError> {
        let id = RevisionId::parse(&parts.id)?;
        let parents = parts
            .parents
            .iter()
            .map(|p| RevisionId::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        if parents.contains(&id) {
            return Err(VcsError::InvalidQuery(format!(
                "revision {id} lists itself as a parent"
            )));
        }

        let subject = parts.message.lines().next().unwrap_or_default().to_string();
        let mut branches: Vec<String> = Vec::with_capacity(parts.branches.len());
        for branch in parts.branches {
            if !branches.contains(&branch) {
                branches.push(branch);
            }
        }

        Ok(Self {
            id,
            message: parts.message,
            subject,
            author: parts.author,
            committer: parts.committer,
            author_date: parts.author_date,
            committer_date: parts.committer_date,
            parents,
            branches,
        })
    }

    pub fn id(&self) -> &RevisionId {
        &self.id
    }

    /// Full commit message, exactly as recorded
    pub fn message(&self) -> &str {
        &self.message
    }

    /// First line of the message
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// `Name <email>`
    pub fn author(&self) -> &str {
        &self.author
    }

    /// `Name <email>`; equal to the author for backends without a committer
    pub fn committer(&self) -> &str {
        &self.committer
    }

    pub fn author_date(&self) -> DateTime<FixedOffset> {
        self.author_date
    }

    pub fn committer_date(&self) -> DateTime<FixedOffset> {
        self.committer_date
    }

    /// Parent ids in recorded order; empty for a root revision
    pub fn parents(&self) -> &[RevisionId] {
        &self.parents
    }

    /// Branches containing this revision, in discovery order
    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Revision {}

impl Hash for Revision {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

fn rfc3339<S: Serializer>(date: &DateTime<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&date.to_rfc3339())
}

/// Format a `Name <email>` signature
pub fn format_signature(name: &str, email: &str) -> String {
    format!("{name} <{email}>")
}

/// Parameters for a history query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Walk ancestors of (and including) this revision reference
    pub parent: Option<String>,
    /// Walk ancestors of (and including) the tip of this branch
    pub branch: Option<String>,
    /// Substring of the author's name or email
    pub author: Option<String>,
    /// Leading results to skip
    pub offset: usize,
    /// Maximum results to return; unlimited when `None`
    pub limit: Option<usize>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject mutually exclusive or malformed parameters.
    pub fn validate(&self) -> Result<(), VcsError> {
        if self.parent.is_some() && self.branch.is_some() {
            return Err(VcsError::InvalidQuery(
                "parent and branch cannot both be set".into(),
            ));
        }
        for (name, value) in [("parent", &self.parent), ("branch", &self.branch)] {
            if let Some(value) = value {
                if value.is_empty() || value.starts_with('-') {
                    return Err(VcsError::InvalidQuery(format!(
                        "{name} {value:?} is not a valid reference"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether a revision by `name <email>` passes the author filter.
    pub fn matches_author(&self, name: &str, email: &str) -> bool {
        match &self.author {
            Some(needle) => name.contains(needle.as_str()) || email.contains(needle.as_str()),
            None => true,
        }
    }
}
