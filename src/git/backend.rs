//! The version-control collaborator the composer depends on.
//!
//! Everything the session, the safety validator and the finalization engine
//! need from git goes through [`GitBackend`]; the production implementation is
//! [`super::GitCli`], tests use an in-memory fake.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which side of the working copy a diff is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffScope {
    /// Index vs HEAD (`git diff --cached`)
    Staged,
    /// Working tree vs index (`git diff`)
    Unstaged,
}

impl DiffScope {
    pub fn label(&self) -> &'static str {
        match self {
            DiffScope::Staged => "staged",
            DiffScope::Unstaged => "unstaged",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    pub name: String,
    /// Sha the branch ref currently points at
    pub sha: String,
}

/// One entry of `git stash list`
#[derive(Debug, Clone, PartialEq)]
pub struct StashEntry {
    /// Selector usable with `stash apply`, e.g. `stash@{0}`
    pub name: String,
    /// Sha of the stash commit; the stable identity of the entry
    pub sha: String,
    /// The message given to `stash push`, without git's `On <branch>:` prefix
    pub message: String,
}

/// A patch to turn into one commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitPatch {
    pub message: String,
    /// Patch texts applied in order on top of the parent tree
    pub patches: Vec<String>,
}

#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Repository root on disk
    fn path(&self) -> &Path;

    /// Short display name of the repository
    fn name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Raw diff text for `scope`, `None` when there are no changes
    async fn get_diff(&self, scope: DiffScope) -> Result<Option<String>>;

    /// Resolve `reference` to a commit, `None` when it does not resolve
    async fn get_commit(&self, reference: &str) -> Result<Option<CommitInfo>>;

    /// Current branch, `None` when HEAD is detached or unborn
    async fn get_current_branch(&self) -> Result<Option<BranchInfo>>;

    /// Identity of the worktree the backend operates on
    async fn get_worktree_name(&self) -> Result<String>;

    /// Create one commit per patch, each parented on the previous one
    /// (the first on `base_sha`), without moving any ref. Returns the new
    /// shas in patch order.
    async fn create_unreachable_commits_from_patches(
        &self,
        base_sha: &str,
        patches: &[CommitPatch],
    ) -> Result<Vec<String>>;

    /// `git stash push`; fails when git refuses to stash
    async fn save_stash(
        &self,
        message: &str,
        pathspecs: Option<&[String]>,
        include_untracked: bool,
    ) -> Result<()>;

    /// All stash entries, most recent first
    async fn get_stash(&self) -> Result<Vec<StashEntry>>;

    /// Apply a stash entry, dropping it afterwards when `delete_after`
    async fn apply_stash(&self, name: &str, delete_after: bool) -> Result<()>;

    /// Move the current branch to `sha`
    async fn reset(&self, sha: &str, hard: bool) -> Result<()>;
}

/// Opens backends for repository paths. Returns `None` once a repository is
/// gone, which the session reports as `RepositoryUnavailable`.
pub trait RepositoryResolver: Send + Sync {
    fn open(&self, path: &Path) -> Option<Arc<dyn GitBackend>>;

    /// Repository to use when the caller did not name one
    fn default_path(&self) -> Option<PathBuf>;
}
