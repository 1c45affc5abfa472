//! Safety snapshots: a fingerprint of the repository taken when a session
//! opens, re-checked right before anything destructive happens.

use super::hunks::HunkOrigin;
use crate::git::{DiffScope, GitBackend};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySnapshot {
    pub repo_path: String,
    pub head_sha: Option<String>,
    pub branch_name: Option<String>,
    pub branch_ref_sha: Option<String>,
    pub worktree_name: String,
    /// `None` when there were no staged changes
    pub staged_diff: Option<String>,
    /// `None` when there were no unstaged changes
    pub unstaged_diff: Option<String>,
    /// Capture time, milliseconds since the epoch. Not part of comparisons.
    pub timestamp: i64,
}

impl SafetySnapshot {
    pub fn diff(&self, scope: DiffScope) -> Option<&str> {
        match scope {
            DiffScope::Staged => self.staged_diff.as_deref(),
            DiffScope::Unstaged => self.unstaged_diff.as_deref(),
        }
    }

    /// Structural equality ignoring the capture time
    pub fn same_state(&self, other: &SafetySnapshot) -> bool {
        self.repo_path == other.repo_path
            && self.head_sha == other.head_sha
            && self.branch_name == other.branch_name
            && self.branch_ref_sha == other.branch_ref_sha
            && self.worktree_name == other.worktree_name
            && self.staged_diff == other.staged_diff
            && self.unstaged_diff == other.unstaged_diff
    }
}

/// Result of re-validating a snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read the current repository state. Best effort, takes no locks.
pub async fn capture(repo: &dyn GitBackend) -> Result<SafetySnapshot> {
    let head = repo.get_commit("HEAD").await?;
    let branch = repo.get_current_branch().await?;
    let worktree_name = repo.get_worktree_name().await?;
    let staged_diff = repo.get_diff(DiffScope::Staged).await?;
    let unstaged_diff = repo.get_diff(DiffScope::Unstaged).await?;

    let snapshot = SafetySnapshot {
        repo_path: repo.path().to_string_lossy().into_owned(),
        head_sha: head.map(|c| c.sha),
        branch_name: branch.as_ref().map(|b| b.name.clone()),
        branch_ref_sha: branch.map(|b| b.sha),
        worktree_name,
        staged_diff,
        unstaged_diff,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    debug!(
        head = snapshot.head_sha.as_deref().unwrap_or("-"),
        branch = snapshot.branch_name.as_deref().unwrap_or("-"),
        "captured safety snapshot"
    );
    Ok(snapshot)
}

/// Re-capture and compare against `baseline`. Every violated check adds one
/// error; only the diffs of origins present in `committing` are compared.
pub async fn validate<'a, I>(
    repo: &dyn GitBackend,
    baseline: &SafetySnapshot,
    committing: I,
) -> Result<ValidationReport>
where
    I: IntoIterator<Item = &'a HunkOrigin>,
{
    let current = capture(repo).await?;
    if current.same_state(baseline) {
        debug!("repository unchanged since snapshot");
        return Ok(ValidationReport::default());
    }
    let mut errors = Vec::new();

    if current.repo_path != baseline.repo_path {
        errors.push(format!(
            "Repository changed from {} to {}",
            baseline.repo_path, current.repo_path
        ));
    }

    if current.head_sha != baseline.head_sha {
        errors.push(format!(
            "HEAD commit changed from {} to {}",
            display(&baseline.head_sha),
            display(&current.head_sha)
        ));
    }

    if current.branch_name != baseline.branch_name {
        errors.push(format!(
            "Branch changed from {} to {}",
            display(&baseline.branch_name),
            display(&current.branch_name)
        ));
    } else if current.branch_ref_sha != baseline.branch_ref_sha {
        errors.push(format!(
            "Branch {} moved from {} to {}",
            display(&baseline.branch_name),
            display(&baseline.branch_ref_sha),
            display(&current.branch_ref_sha)
        ));
    }

    if current.worktree_name != baseline.worktree_name {
        errors.push(format!(
            "Worktree changed from {} to {}",
            baseline.worktree_name, current.worktree_name
        ));
    }

    let scopes: BTreeSet<DiffScope> = committing.into_iter().filter_map(HunkOrigin::scope).collect();
    for scope in scopes {
        if current.diff(scope) != baseline.diff(scope) {
            errors.push(format!(
                "The {} changes were modified since the composer opened",
                scope.label()
            ));
        }
    }

    if !errors.is_empty() {
        warn!(count = errors.len(), "safety validation failed");
    }
    Ok(ValidationReport { errors })
}

fn display(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(none)")
}
