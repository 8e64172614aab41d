//! Reverse index from revision id to every branch whose history contains it.
//!
//! Built once per query by walking the ancestry of each branch tip. A branch
//! created after a revision still counts as containing it, so a root commit
//! typically belongs to every branch.

use std::collections::{HashMap, HashSet};

use crate::error::VcsError;
use crate::types::RevisionId;

#[derive(Debug, Default)]
pub struct BranchIndex {
    members: HashMap<RevisionId, Vec<String>>,
}

impl BranchIndex {
    /// Walk every branch tip through `graph` (id -> parent ids).
    ///
    /// `default_branch` is walked first; remaining branches follow in the
    /// order given, which fixes the order names appear in per revision.
    pub fn build(
        graph: &HashMap<RevisionId, Vec<RevisionId>>,
        tips: &[(String, RevisionId)],
        default_branch: Option<&str>,
    ) -> Self {
        let mut ordered: Vec<&(String, RevisionId)> = tips.iter().collect();
        if let Some(default) = default_branch {
            // stable: only moves the default branch to the front
            ordered.sort_by_key(|(name, _)| name != default);
        }

        let mut members: HashMap<RevisionId, Vec<String>> = HashMap::new();
        for (branch, tip) in ordered {
            let mut visited: HashSet<&RevisionId> = HashSet::new();
            let mut pending: Vec<&RevisionId> = vec![tip];

            while let Some(id) = pending.pop() {
                if !visited.insert(id) {
                    continue;
                }
                let names = members.entry(id.clone()).or_default();
                if !names.contains(branch) {
                    names.push(branch.clone());
                }
                if let Some(parents) = graph.get(id) {
                    pending.extend(parents.iter().filter(|p| !visited.contains(p)));
                }
            }
        }

        Self { members }
    }

    /// Branches containing `id`, in discovery order; empty if unreachable
    pub fn branches_of(&self, id: &RevisionId) -> &[String] {
        self.members.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Parse one `git rev-list --parents` line (`id parent...`); blank lines are `None`
pub fn parse_parent_line(
    command: &str,
    line: &str,
) -> Result<Option<(RevisionId, Vec<RevisionId>)>, VcsError> {
    let mut ids = line.split_whitespace().map(|id| {
        RevisionId::parse(id).map_err(|_| VcsError::parse(command, format!("bad id in {line:?}")))
    });
    let Some(id) = ids.next() else {
        return Ok(None);
    };
    let parents = ids.collect::<Result<Vec<_>, _>>()?;
    Ok(Some((id?, parents)))
}

/// Parse `git for-each-ref --format='%(objectname) %(refname:lstrip=2)'` output
pub fn parse_branch_tips(command: &str, output: &str) -> Result<Vec<(String, RevisionId)>, VcsError> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (id, name) = line
                .split_once(' ')
                .ok_or_else(|| VcsError::parse(command, format!("malformed ref line {line:?}")))?;
            let id = RevisionId::parse(id)
                .map_err(|_| VcsError::parse(command, format!("bad id in {line:?}")))?;
            Ok((name.to_string(), id))
        })
        .collect()
}
