//! The session controller: owns the single open composition session and
//! exposes it to the frontend as a read model, a command surface and an
//! event stream.

use super::cache::BootstrapCache;
use crate::ai::{GenerationGateway, GroupingRequest, OperationSlot, Outcome};
use crate::compose::{
    build_commit_patch, capture, index_hunks, DraftCommit, DraftPlan, FinalizeEngine,
    FinalizeOutcome, FinalizeRequest, Hunk, HunkMapEntry, HunkSet, SafetySnapshot,
};
use crate::config::ComposerConfig;
use crate::error::{ComposerError, Result};
use crate::git::{DiffScope, GitBackend, RepositoryResolver};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub const NO_REPOSITORY: &str =
    "No repository found. Please open a Git repository to use the Commit Composer.";
pub const NO_CHANGES: &str = "No changes found to compose commits from.";
pub const NO_BASE_COMMIT: &str = "No base commit found to compose from.";
pub const NO_BRANCH: &str = "No current branch found to compose from.";

/// The commit the composed commits are stacked on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseCommit {
    pub sha: String,
    pub message: String,
    pub repo_name: String,
    pub branch_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiOperation {
    Grouping,
    Message,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ComposerEvent {
    Loaded,
    Reloaded,
    LoadingError { message: String },
    StartedGeneratingGrouping,
    GeneratedGrouping { drafts: Vec<DraftCommit> },
    CancelledGrouping,
    StartedGeneratingMessage { draft_id: String },
    GeneratedMessage { draft_id: String, message: String },
    CancelledMessage { draft_id: String },
    AiOperationFailed { operation: AiOperation, error: String },
    StartedCommitting,
    FinishedCommitting { shas: Vec<String>, cancel_ignored: bool },
    CancelledCommitting,
    SafetyError { errors: Vec<String> },
    CommitFailed { error: String },
    Closed,
}

/// Read model of the open session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub repo_path: PathBuf,
    pub hunks: Vec<Hunk>,
    pub hunk_map: Vec<HunkMapEntry>,
    pub drafts: Vec<DraftCommit>,
    pub unassigned: Vec<usize>,
    pub base: BaseCommit,
    pub safety: SafetySnapshot,
    pub generating_grouping: bool,
    /// Draft whose message is being generated
    pub generating_message: Option<String>,
    pub committing: bool,
    pub ai_error: Option<String>,
}

/// Everything read from the repository when a session opens
#[derive(Debug, Clone)]
struct Bootstrap {
    hunks: HunkSet,
    base: BaseCommit,
    snapshot: SafetySnapshot,
    plan: DraftPlan,
}

struct Session {
    /// Bumped for every session so late results can tell they are stale
    id: u64,
    repo_path: PathBuf,
    hunks: HunkSet,
    base: BaseCommit,
    snapshot: SafetySnapshot,
    plan: DraftPlan,
    generating_grouping: bool,
    generating_message: Option<String>,
    committing: bool,
    ai_error: Option<String>,
}

impl Session {
    fn view(&self) -> SessionView {
        SessionView {
            repo_path: self.repo_path.clone(),
            hunks: self.hunks.hunks.clone(),
            hunk_map: self.hunks.hunk_map.clone(),
            drafts: self.plan.drafts().to_vec(),
            unassigned: self.plan.unassigned(&self.hunks),
            base: self.base.clone(),
            safety: self.snapshot.clone(),
            generating_grouping: self.generating_grouping,
            generating_message: self.generating_message.clone(),
            committing: self.committing,
            ai_error: self.ai_error.clone(),
        }
    }
}

struct Inner {
    resolver: Arc<dyn RepositoryResolver>,
    gateway: Arc<dyn GenerationGateway>,
    config: ComposerConfig,
    cache: BootstrapCache<Bootstrap>,
    events: UnboundedSender<ComposerEvent>,
    session: Mutex<Option<Session>>,
    next_session_id: Mutex<u64>,
    grouping: OperationSlot,
    message: OperationSlot,
    commit: OperationSlot,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        resolver: Arc<dyn RepositoryResolver>,
        gateway: Arc<dyn GenerationGateway>,
        config: ComposerConfig,
        events: UnboundedSender<ComposerEvent>,
    ) -> Self {
        let cache = BootstrapCache::new(config.session.bootstrap_ttl());
        Self {
            inner: Arc::new(Inner {
                resolver,
                gateway,
                config,
                cache,
                events,
                session: Mutex::new(None),
                next_session_id: Mutex::new(0),
                grouping: OperationSlot::default(),
                message: OperationSlot::default(),
                commit: OperationSlot::default(),
            }),
        }
    }

    fn emit(&self, event: ComposerEvent) {
        debug!(?event, "composer event");
        // Nobody listening is fine
        let _ = self.inner.events.send(event);
    }

    pub fn view(&self) -> Option<SessionView> {
        self.inner.session.lock().as_ref().map(Session::view)
    }

    /// Run `f` against the open session
    fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.session.lock();
        let session = guard.as_mut().ok_or(ComposerError::NoSession)?;
        f(session)
    }

    // ── Lifecycle ──

    /// Open the composer for `path` (or the resolver's default repository).
    /// Only an argument-less load may reuse a cached bootstrap.
    pub async fn load(&self, path: Option<&Path>) -> Result<SessionView> {
        self.dispose();

        let explicit = path.is_some();
        let Some(path) = path
            .map(Path::to_path_buf)
            .or_else(|| self.inner.resolver.default_path())
        else {
            return Err(self.loading_error(NO_REPOSITORY));
        };

        if explicit || self.current_path().is_some_and(|current| current != path) {
            self.inner.cache.invalidate();
        }

        let Some(repo) = self.inner.resolver.open(&path) else {
            self.inner.cache.invalidate();
            return Err(self.loading_error(NO_REPOSITORY));
        };

        let loaded = match self.inner.cache.get(&path) {
            Some(cached) => cached,
            None => {
                let fresh = match bootstrap(repo.as_ref()).await {
                    Ok(b) => b,
                    Err(ComposerError::Loading(message)) => {
                        return Err(self.loading_error(&message))
                    }
                    Err(e) => return Err(e),
                };
                self.inner.cache.insert(&path, fresh.clone());
                fresh
            }
        };

        let view = self.install(path, loaded);
        self.emit(ComposerEvent::Loaded);
        Ok(view)
    }

    /// Throw the session away and read the repository again
    pub async fn reload(&self) -> Result<SessionView> {
        let path = self.current_path().ok_or(ComposerError::NoSession)?;
        self.dispose();
        self.inner.cache.invalidate();

        let Some(repo) = self.inner.resolver.open(&path) else {
            warn!(repo = %path.display(), "repository disappeared");
            *self.inner.session.lock() = None;
            self.emit(ComposerEvent::LoadingError {
                message: ComposerError::RepositoryUnavailable.to_string(),
            });
            return Err(ComposerError::RepositoryUnavailable);
        };

        let fresh = match bootstrap(repo.as_ref()).await {
            Ok(b) => b,
            Err(e) => {
                *self.inner.session.lock() = None;
                if let ComposerError::Loading(message) = &e {
                    self.emit(ComposerEvent::LoadingError {
                        message: message.clone(),
                    });
                }
                return Err(e);
            }
        };
        self.inner.cache.insert(&path, fresh.clone());

        let view = self.install(path, fresh);
        self.emit(ComposerEvent::Reloaded);
        Ok(view)
    }

    /// Cancel every outstanding request. Each one reports its own
    /// cancellation when it observes it.
    pub fn dispose(&self) {
        self.inner.grouping.cancel();
        self.inner.message.cancel();
        self.inner.commit.cancel();
    }

    pub fn close(&self) {
        self.dispose();
        let had_session = self.inner.session.lock().take().is_some();
        if had_session {
            info!("composer closed");
            self.emit(ComposerEvent::Closed);
        }
    }

    fn current_path(&self) -> Option<PathBuf> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.repo_path.clone())
    }

    fn loading_error(&self, message: &str) -> ComposerError {
        warn!(%message, "composer failed to load");
        self.emit(ComposerEvent::LoadingError {
            message: message.to_string(),
        });
        ComposerError::Loading(message.to_string())
    }

    fn install(&self, path: PathBuf, bootstrap: Bootstrap) -> SessionView {
        let id = {
            let mut next = self.inner.next_session_id.lock();
            *next += 1;
            *next
        };
        let session = Session {
            id,
            repo_path: path,
            hunks: bootstrap.hunks,
            base: bootstrap.base,
            snapshot: bootstrap.snapshot,
            plan: bootstrap.plan,
            generating_grouping: false,
            generating_message: None,
            committing: false,
            ai_error: None,
        };
        let view = session.view();
        info!(repo = %view.repo_path.display(), hunks = view.hunks.len(), "composer loaded");
        *self.inner.session.lock() = Some(session);
        view
    }

    // ── Draft editing ──

    pub fn add_draft(&self, message: &str) -> Result<String> {
        self.with_session(|s| Ok(s.plan.add(message)))
    }

    pub fn remove_draft(&self, draft_id: &str) -> Result<()> {
        self.with_session(|s| s.plan.remove(draft_id).map(|_| ()))
    }

    pub fn reorder_draft(&self, draft_id: &str, position: usize) -> Result<()> {
        self.with_session(|s| s.plan.reorder(draft_id, position))
    }

    pub fn set_draft_message(&self, draft_id: &str, message: &str) -> Result<()> {
        self.with_session(|s| s.plan.set_message(draft_id, message))
    }

    /// Move a hunk into `draft_id`, or back to unassigned when `None`
    pub fn move_hunk(&self, index: usize, draft_id: Option<&str>) -> Result<()> {
        self.with_session(|s| s.plan.move_hunk(&s.hunks, index, draft_id))
    }

    /// Replace the whole plan, e.g. with one read from a file. A draft naming
    /// a missing or already claimed hunk leaves the current plan untouched.
    pub fn replace_drafts(&self, drafts: Vec<DraftCommit>) -> Result<Vec<DraftCommit>> {
        self.with_session(|s| {
            s.plan = DraftPlan::try_from_drafts(drafts, &s.hunks)?;
            Ok(s.plan.drafts().to_vec())
        })
    }

    pub fn clear_ai_error(&self) {
        if let Some(s) = self.inner.session.lock().as_mut() {
            s.ai_error = None;
        }
    }

    // ── Generation ──

    /// Ask the gateway to regroup every hunk. Supersedes a grouping already
    /// in flight.
    pub async fn generate_grouping(
        &self,
        custom_instructions: Option<String>,
    ) -> Result<Outcome<Vec<DraftCommit>>> {
        let (session_id, request) = self.with_session(|s| {
            s.generating_grouping = true;
            s.ai_error = None;
            Ok((
                s.id,
                GroupingRequest {
                    hunks: s.hunks.hunks.clone(),
                    existing_drafts: s.plan.drafts().to_vec(),
                    hunk_map: s.hunks.hunk_map.clone(),
                    custom_instructions: custom_instructions
                        .or_else(|| self.inner.config.grouping.custom_instructions.clone()),
                    digest: s.hunks.digest.clone(),
                },
            ))
        })?;
        let (op, token) = self.inner.grouping.begin();
        self.emit(ComposerEvent::StartedGeneratingGrouping);
        info!(hunks = request.hunks.len(), "generating grouping");

        let outcome = self.inner.gateway.generate_grouping(&request, &token).await;
        let outcome = if token.is_cancelled() {
            Outcome::Cancelled
        } else {
            outcome
        };

        let result = {
            let mut guard = self.inner.session.lock();
            let live = guard
                .as_mut()
                .filter(|s| s.id == session_id && s.hunks.digest == request.digest);
            match (outcome, live) {
                (Outcome::Completed(grouping), Some(s)) => {
                    s.plan = DraftPlan::from_drafts(grouping.into_drafts(), &s.hunks);
                    Outcome::Completed(s.plan.drafts().to_vec())
                }
                (Outcome::Failed(error), Some(s)) => {
                    s.ai_error = Some(error.clone());
                    Outcome::Failed(error)
                }
                (Outcome::Failed(error), None) => Outcome::Failed(error),
                // Result for a session or hunk set that no longer exists
                (Outcome::Completed(_) | Outcome::Cancelled, _) => Outcome::Cancelled,
            }
        };

        self.inner.grouping.finish(op);
        if !self.inner.grouping.is_active() {
            if let Some(s) = self.inner.session.lock().as_mut() {
                s.generating_grouping = false;
            }
        }

        match &result {
            Outcome::Completed(drafts) => {
                info!(drafts = drafts.len(), "grouping generated");
                self.emit(ComposerEvent::GeneratedGrouping {
                    drafts: drafts.clone(),
                });
            }
            Outcome::Cancelled => self.emit(ComposerEvent::CancelledGrouping),
            Outcome::Failed(error) => {
                warn!(%error, "grouping failed");
                self.emit(ComposerEvent::AiOperationFailed {
                    operation: AiOperation::Grouping,
                    error: error.clone(),
                });
            }
        }
        Ok(result)
    }

    /// Generate and store a message for one draft
    pub async fn generate_message(&self, draft_id: &str) -> Result<Outcome<String>> {
        let (session_id, diff) = self.with_session(|s| {
            let draft = s
                .plan
                .get(draft_id)
                .ok_or_else(|| ComposerError::Assignment(format!("Unknown draft commit: {draft_id}")))?;
            if draft.hunk_indices.is_empty() {
                return Err(ComposerError::Assignment(format!(
                    "Draft commit {draft_id} has no changes"
                )));
            }
            let patch = build_commit_patch(draft, &s.hunks)?;
            s.generating_message = Some(draft_id.to_string());
            s.ai_error = None;
            Ok((s.id, patch.patches.join("\n")))
        })?;
        let (op, token) = self.inner.message.begin();
        self.emit(ComposerEvent::StartedGeneratingMessage {
            draft_id: draft_id.to_string(),
        });

        let outcome = self
            .inner
            .gateway
            .generate_message(draft_id, &diff, &token)
            .await;
        let outcome = if token.is_cancelled() {
            Outcome::Cancelled
        } else {
            outcome
        };

        let result = {
            let mut guard = self.inner.session.lock();
            let live = guard.as_mut().filter(|s| s.id == session_id);
            match (outcome, live) {
                (Outcome::Completed(generated), Some(s)) => {
                    let message = generated.to_message();
                    match s.plan.set_message(draft_id, message.clone()) {
                        Ok(()) => Outcome::Completed(message),
                        // Draft was removed meanwhile
                        Err(_) => Outcome::Cancelled,
                    }
                }
                (Outcome::Failed(error), Some(s)) => {
                    s.ai_error = Some(error.clone());
                    Outcome::Failed(error)
                }
                (Outcome::Failed(error), None) => Outcome::Failed(error),
                (Outcome::Completed(_) | Outcome::Cancelled, _) => Outcome::Cancelled,
            }
        };

        self.inner.message.finish(op);
        if !self.inner.message.is_active() {
            if let Some(s) = self.inner.session.lock().as_mut() {
                s.generating_message = None;
            }
        }

        match &result {
            Outcome::Completed(message) => self.emit(ComposerEvent::GeneratedMessage {
                draft_id: draft_id.to_string(),
                message: message.clone(),
            }),
            Outcome::Cancelled => self.emit(ComposerEvent::CancelledMessage {
                draft_id: draft_id.to_string(),
            }),
            Outcome::Failed(error) => {
                warn!(draft = draft_id, %error, "message generation failed");
                self.emit(ComposerEvent::AiOperationFailed {
                    operation: AiOperation::Message,
                    error: error.clone(),
                });
            }
        }
        Ok(result)
    }

    pub fn cancel_grouping(&self) -> bool {
        self.inner.grouping.cancel()
    }

    pub fn cancel_message(&self) -> bool {
        self.inner.message.cancel()
    }

    // ── Finalization ──

    /// Commit the plan. On success the session closes.
    pub async fn finalize(&self) -> Result<FinalizeOutcome> {
        let (repo_path, plan, hunks, snapshot, base_sha) = self.with_session(|s| {
            if s.committing {
                return Err(ComposerError::Busy);
            }
            s.committing = true;
            Ok((
                s.repo_path.clone(),
                s.plan.clone(),
                s.hunks.clone(),
                s.snapshot.clone(),
                s.base.sha.clone(),
            ))
        })?;

        let Some(repo) = self.inner.resolver.open(&repo_path) else {
            warn!(repo = %repo_path.display(), "repository disappeared before commit");
            if let Some(s) = self.inner.session.lock().as_mut() {
                s.committing = false;
            }
            self.emit(ComposerEvent::CommitFailed {
                error: ComposerError::RepositoryUnavailable.to_string(),
            });
            return Err(ComposerError::RepositoryUnavailable);
        };
        let engine = FinalizeEngine::new(repo)
            .with_stash_prefix(self.inner.config.finalize.stash_message_prefix.clone());

        let (op, token) = self.inner.commit.begin();
        self.emit(ComposerEvent::StartedCommitting);

        let result = engine
            .run(
                FinalizeRequest {
                    plan: &plan,
                    hunks: &hunks,
                    snapshot: &snapshot,
                    base_sha: &base_sha,
                },
                &token,
            )
            .await;

        self.inner.commit.finish(op);
        if let Some(s) = self.inner.session.lock().as_mut() {
            s.committing = false;
        }

        match &result {
            Ok(FinalizeOutcome::Completed(report)) => {
                self.inner.cache.invalidate();
                self.emit(ComposerEvent::FinishedCommitting {
                    shas: report.shas.clone(),
                    cancel_ignored: report.cancel_ignored,
                });
                self.close();
            }
            Ok(FinalizeOutcome::Cancelled { .. }) => self.emit(ComposerEvent::CancelledCommitting),
            Err(ComposerError::SafetyValidation { errors }) => {
                self.emit(ComposerEvent::SafetyError {
                    errors: errors.clone(),
                })
            }
            Err(e) => {
                if !e.repository_unchanged() {
                    self.inner.cache.invalidate();
                }
                self.emit(ComposerEvent::CommitFailed {
                    error: e.to_string(),
                });
            }
        }
        result
    }

    pub fn cancel_finalize(&self) -> bool {
        self.inner.commit.cancel()
    }
}

/// Read diffs, base commit and branch, then index and seed
async fn bootstrap(repo: &dyn GitBackend) -> Result<Bootstrap> {
    let staged = repo.get_diff(DiffScope::Staged).await?;
    let unstaged = repo.get_diff(DiffScope::Unstaged).await?;
    if staged.is_none() && unstaged.is_none() {
        return Err(ComposerError::Loading(NO_CHANGES.to_string()));
    }

    let head = repo
        .get_commit("HEAD")
        .await?
        .ok_or_else(|| ComposerError::Loading(NO_BASE_COMMIT.to_string()))?;
    let branch = repo
        .get_current_branch()
        .await?
        .ok_or_else(|| ComposerError::Loading(NO_BRANCH.to_string()))?;

    let snapshot = capture(repo).await?;
    let hunks = index_hunks(staged.as_deref(), unstaged.as_deref());
    if hunks.is_empty() {
        return Err(ComposerError::Loading(NO_CHANGES.to_string()));
    }
    let plan = DraftPlan::initial_for(&hunks);

    Ok(Bootstrap {
        hunks,
        base: BaseCommit {
            sha: head.sha,
            message: head.message,
            repo_name: repo.name(),
            branch_name: branch.name,
        },
        snapshot,
        plan,
    })
}
