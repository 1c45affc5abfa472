//! In-memory `GitBackend` for tests. Records every mutating call.

pub use super::hunks::tests::{STAGED_A, UNSTAGED_B};
use crate::git::{
    BranchInfo, CommitInfo, CommitPatch, DiffScope, GitBackend, RepositoryResolver, StashEntry,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateCommits { base: String, patches: Vec<CommitPatch> },
    SaveStash { message: String },
    ApplyStash { name: String, delete_after: bool },
    Reset { sha: String, hard: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallKind {
    GetStash,
    CreateCommits,
    SaveStash,
    ApplyStash,
    Reset,
}

struct State {
    head: Option<String>,
    head_message: String,
    branch: Option<String>,
    branch_sha: Option<String>,
    worktree: String,
    staged: Option<String>,
    unstaged: Option<String>,
    stashes: Vec<StashEntry>,
    calls: Vec<Call>,
    next_commit: usize,
    next_stash: usize,
    fail_create: bool,
    fail_save_stash: bool,
    fail_apply_stash: bool,
    fail_reset: bool,
    /// `save_stash` succeeds but records nothing (clean tree)
    stash_is_noop: bool,
    hooks: Vec<(CallKind, Hook)>,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                head: Some("base000".to_string()),
                head_message: "Initial commit".to_string(),
                branch: Some("main".to_string()),
                branch_sha: Some("base000".to_string()),
                worktree: "/repo/project/.git".to_string(),
                staged: None,
                unstaged: None,
                stashes: Vec::new(),
                calls: Vec::new(),
                next_commit: 1,
                next_stash: 1,
                fail_create: false,
                fail_save_stash: false,
                fail_apply_stash: false,
                fail_reset: false,
                stash_is_noop: false,
                hooks: Vec::new(),
            }),
        }
    }

    pub fn with_diffs(staged: Option<&str>, unstaged: Option<&str>) -> Self {
        let repo = Self::new();
        repo.set_diff(DiffScope::Staged, staged);
        repo.set_diff(DiffScope::Unstaged, unstaged);
        repo
    }

    pub fn set_head(&self, sha: &str) {
        let mut s = self.state.lock();
        s.head = Some(sha.to_string());
        s.branch_sha = Some(sha.to_string());
    }

    pub fn set_branch(&self, name: Option<&str>) {
        self.state.lock().branch = name.map(str::to_string);
    }

    pub fn set_worktree(&self, name: &str) {
        self.state.lock().worktree = name.to_string();
    }

    pub fn set_diff(&self, scope: DiffScope, text: Option<&str>) {
        let mut s = self.state.lock();
        let text = text.map(str::to_string);
        match scope {
            DiffScope::Staged => s.staged = text,
            DiffScope::Unstaged => s.unstaged = text,
        }
    }

    pub fn push_existing_stash(&self, message: &str) {
        let mut s = self.state.lock();
        let sha = format!("oldstash{}", s.next_stash);
        s.next_stash += 1;
        s.stashes.insert(
            0,
            StashEntry {
                name: String::new(),
                sha,
                message: message.to_string(),
            },
        );
        renumber(&mut s.stashes);
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    pub fn fail_save_stash(&self) {
        self.state.lock().fail_save_stash = true;
    }

    pub fn fail_apply_stash(&self) {
        self.state.lock().fail_apply_stash = true;
    }

    pub fn fail_reset(&self) {
        self.state.lock().fail_reset = true;
    }

    pub fn stash_is_noop(&self) {
        self.state.lock().stash_is_noop = true;
    }

    /// Cancel `token` as soon as a call of `kind` completes
    pub fn cancel_on(&self, kind: CallKind, token: CancellationToken) {
        self.on_call(kind, move || token.cancel());
    }

    /// Run `hook` every time a call of `kind` completes
    pub fn on_call(&self, kind: CallKind, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().hooks.push((kind, Arc::new(hook)));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn stashes(&self) -> Vec<StashEntry> {
        self.state.lock().stashes.clone()
    }

    pub fn head(&self) -> Option<String> {
        self.state.lock().head.clone()
    }

    fn trip(&self, kind: CallKind) {
        let hooks: Vec<Hook> = self
            .state
            .lock()
            .hooks
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| h.clone())
            .collect();
        for hook in hooks {
            hook();
        }
    }
}

fn renumber(stashes: &mut [StashEntry]) {
    for (i, entry) in stashes.iter_mut().enumerate() {
        entry.name = format!("stash@{{{i}}}");
    }
}

#[async_trait]
impl GitBackend for FakeBackend {
    fn path(&self) -> &Path {
        // The path never changes after construction
        Path::new("/repo/project")
    }

    async fn get_diff(&self, scope: DiffScope) -> Result<Option<String>> {
        let s = self.state.lock();
        Ok(match scope {
            DiffScope::Staged => s.staged.clone(),
            DiffScope::Unstaged => s.unstaged.clone(),
        })
    }

    async fn get_commit(&self, reference: &str) -> Result<Option<CommitInfo>> {
        let s = self.state.lock();
        if reference != "HEAD" {
            return Ok(None);
        }
        Ok(s.head.clone().map(|sha| CommitInfo {
            sha,
            message: s.head_message.clone(),
        }))
    }

    async fn get_current_branch(&self) -> Result<Option<BranchInfo>> {
        let s = self.state.lock();
        Ok(match (&s.branch, &s.branch_sha) {
            (Some(name), Some(sha)) => Some(BranchInfo {
                name: name.clone(),
                sha: sha.clone(),
            }),
            _ => None,
        })
    }

    async fn get_worktree_name(&self) -> Result<String> {
        Ok(self.state.lock().worktree.clone())
    }

    async fn create_unreachable_commits_from_patches(
        &self,
        base_sha: &str,
        patches: &[CommitPatch],
    ) -> Result<Vec<String>> {
        {
            let mut s = self.state.lock();
            s.calls.push(Call::CreateCommits {
                base: base_sha.to_string(),
                patches: patches.to_vec(),
            });
            if s.fail_create {
                anyhow::bail!("git apply failed: patch does not apply");
            }
        }
        let shas = {
            let mut s = self.state.lock();
            let mut shas = Vec::new();
            for _ in patches {
                shas.push(format!("new{:03}", s.next_commit));
                s.next_commit += 1;
            }
            shas
        };
        self.trip(CallKind::CreateCommits);
        Ok(shas)
    }

    async fn save_stash(
        &self,
        message: &str,
        _pathspecs: Option<&[String]>,
        _include_untracked: bool,
    ) -> Result<()> {
        {
            let mut s = self.state.lock();
            s.calls.push(Call::SaveStash {
                message: message.to_string(),
            });
            if s.fail_save_stash {
                anyhow::bail!("git stash failed: could not save index state");
            }
            if !s.stash_is_noop {
                let sha = format!("stash{:03}", s.next_stash);
                s.next_stash += 1;
                s.stashes.insert(
                    0,
                    StashEntry {
                        name: String::new(),
                        sha,
                        message: message.to_string(),
                    },
                );
                renumber(&mut s.stashes);
            }
        }
        self.trip(CallKind::SaveStash);
        Ok(())
    }

    async fn get_stash(&self) -> Result<Vec<StashEntry>> {
        let stashes = self.state.lock().stashes.clone();
        self.trip(CallKind::GetStash);
        Ok(stashes)
    }

    async fn apply_stash(&self, name: &str, delete_after: bool) -> Result<()> {
        {
            let mut s = self.state.lock();
            s.calls.push(Call::ApplyStash {
                name: name.to_string(),
                delete_after,
            });
            if s.fail_apply_stash {
                anyhow::bail!("git stash apply failed: conflict in b.ts");
            }
            if delete_after {
                s.stashes.retain(|e| e.name != name);
                renumber(&mut s.stashes);
            }
        }
        self.trip(CallKind::ApplyStash);
        Ok(())
    }

    async fn reset(&self, sha: &str, hard: bool) -> Result<()> {
        {
            let mut s = self.state.lock();
            s.calls.push(Call::Reset {
                sha: sha.to_string(),
                hard,
            });
            if s.fail_reset {
                anyhow::bail!("git reset failed: unknown revision {sha}");
            }
            s.head = Some(sha.to_string());
            s.branch_sha = Some(sha.to_string());
        }
        self.trip(CallKind::Reset);
        Ok(())
    }
}

/// Resolver over a single shared fake; `close()` makes the repository vanish
pub struct FakeResolver {
    pub repo: Arc<FakeBackend>,
    closed: Mutex<bool>,
}

impl FakeResolver {
    pub fn new(repo: Arc<FakeBackend>) -> Self {
        Self {
            repo,
            closed: Mutex::new(false),
        }
    }

    pub fn close(&self) {
        *self.closed.lock() = true;
    }
}

impl RepositoryResolver for FakeResolver {
    fn open(&self, path: &Path) -> Option<Arc<dyn GitBackend>> {
        if *self.closed.lock() || path != self.repo.path() {
            return None;
        }
        Some(self.repo.clone() as Arc<dyn GitBackend>)
    }

    fn default_path(&self) -> Option<PathBuf> {
        if *self.closed.lock() {
            None
        } else {
            Some(self.repo.path().to_path_buf())
        }
    }
}
