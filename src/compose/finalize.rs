//! The finalization transaction: turns a draft plan into real commits and
//! moves the branch onto them.
//!
//! Steps run strictly in order:
//!
//! 1. validate the safety snapshot against the hunks being committed
//! 2. build one patch per draft
//! 3. create the commits, unreachable, on top of the base commit
//! 4. remember the current top stash
//! 5. stash whatever is left in the working tree
//! 6. hard-reset the branch onto the last new commit
//! 7. restore the stash from step 5
//! 8. report completion
//!
//! Cancellation is checked before steps 1, 3, 5 and 6. Once step 6 has run a
//! cancel no longer undoes anything; it is only reported back.

use super::drafts::DraftPlan;
use super::hunks::{HunkOrigin, HunkSet};
use super::patch::build_patches;
use super::safety::{self, SafetySnapshot};
use crate::error::{ComposerError, Result};
use crate::git::{GitBackend, StashEntry};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_STASH_PREFIX: &str = "Commit composer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStage {
    Validate,
    CreateCommits,
    SaveStash,
    Reset,
}

impl FinalizeStage {
    pub fn label(&self) -> &'static str {
        match self {
            FinalizeStage::Validate => "validate",
            FinalizeStage::CreateCommits => "create-commits",
            FinalizeStage::SaveStash => "save-stash",
            FinalizeStage::Reset => "reset",
        }
    }
}

/// Everything a finalization reads from the session
pub struct FinalizeRequest<'a> {
    pub plan: &'a DraftPlan,
    pub hunks: &'a HunkSet,
    pub snapshot: &'a SafetySnapshot,
    /// Commit the new chain is parented on
    pub base_sha: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    /// New commits in plan order; the branch now points at the last one
    pub shas: Vec<String>,
    /// The stash entry created and restored by the run, if any
    pub stash: Option<String>,
    /// Cancellation arrived after the branch had moved and was not honoured
    pub cancel_ignored: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Completed(FinalizeReport),
    /// Stopped at the checkpoint in front of `before`; branch and working
    /// tree are as they were found
    Cancelled { before: FinalizeStage },
}

pub struct FinalizeEngine {
    repo: Arc<dyn GitBackend>,
    stash_prefix: String,
    running: AtomicBool,
}

/// Clears the engine's running flag when a run settles
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FinalizeEngine {
    pub fn new(repo: Arc<dyn GitBackend>) -> Self {
        Self {
            repo,
            stash_prefix: DEFAULT_STASH_PREFIX.to_string(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_stash_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stash_prefix = prefix.into();
        self
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    fn stash_message(&self) -> String {
        format!(
            "{}: {}",
            self.stash_prefix,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Run all steps. `Err` means the run stopped on a failure;
    /// see [`ComposerError::repository_unchanged`] for what was left behind.
    pub async fn run(
        &self,
        req: FinalizeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<FinalizeOutcome> {
        let _guard = self.try_begin().ok_or(ComposerError::Busy)?;

        // ── 1. Validate ──
        if cancel.is_cancelled() {
            return Ok(cancelled(FinalizeStage::Validate));
        }
        self.validate(&req).await?;

        // ── 2. Build patches ──
        let patches = build_patches(req.plan, req.hunks)?;
        debug!(stage = "build-patches", commits = patches.len(), "patches built");

        // ── 3. Create commits ──
        if cancel.is_cancelled() {
            return Ok(cancelled(FinalizeStage::CreateCommits));
        }
        let shas = self
            .repo
            .create_unreachable_commits_from_patches(req.base_sha, &patches)
            .await
            .map_err(|e| ComposerError::PatchCreation(format!("{e:#}")))?;
        let Some(tip) = shas.last().cloned() else {
            return Err(ComposerError::PatchCreation("No commits were created".to_string()));
        };
        if shas.len() != patches.len() {
            return Err(ComposerError::PatchCreation(format!(
                "Expected {} commits, got {}",
                patches.len(),
                shas.len()
            )));
        }
        info!(stage = "create-commits", sha = %tip, count = shas.len(), "created commits");

        // ── 4. Capture prior stash ──
        let prior = self.repo.get_stash().await?.into_iter().next();

        // ── 5. Stash working changes ──
        if cancel.is_cancelled() {
            // Commits from step 3 stay behind unreachable
            return Ok(cancelled(FinalizeStage::SaveStash));
        }
        let message = self.stash_message();
        if let Err(e) = self.repo.save_stash(&message, None, true).await {
            return Err(ComposerError::StashConflict {
                message: format!("Failed to stash working changes: {e:#}"),
                stash: None,
            });
        }
        let after = self.repo.get_stash().await?;
        let stashed = identify_new_stash(prior.as_ref(), after.first(), &message)?;
        match &stashed {
            Some(entry) => debug!(stage = "save-stash", stash = %entry.name, "stashed working changes"),
            None => debug!(stage = "save-stash", "nothing to stash"),
        }

        // ── 6. Reset branch tip ──
        if cancel.is_cancelled() {
            if let Some(entry) = &stashed {
                self.restore(entry).await?;
            }
            return Ok(cancelled(FinalizeStage::Reset));
        }
        if let Err(e) = self.repo.reset(&tip, true).await {
            warn!(stage = "reset", sha = %tip, error = %e, "reset failed, restoring stash");
            if let Some(entry) = &stashed {
                self.restore(entry).await?;
            }
            return Err(ComposerError::ResetFailed(format!("{e:#}")));
        }
        info!(stage = "reset", sha = %tip, "branch moved");

        // ── 7. Restore preserved changes ──
        let cancel_ignored = cancel.is_cancelled();
        if cancel_ignored {
            info!(stage = "restore-stash", "cancellation after reset ignored");
        }
        if let Some(entry) = &stashed {
            self.restore(entry).await?;
        }

        // ── 8. Complete ──
        info!(stage = "complete", commits = shas.len(), "finalization complete");
        Ok(FinalizeOutcome::Completed(FinalizeReport {
            shas,
            stash: stashed.map(|e| e.name),
            cancel_ignored,
        }))
    }

    async fn validate(&self, req: &FinalizeRequest<'_>) -> Result<()> {
        let assigned: HashSet<usize> = req.plan.assigned().into_iter().collect();
        let origins: HashSet<&HunkOrigin> = req
            .hunks
            .hunks
            .iter()
            .filter(|h| assigned.contains(&h.index))
            .map(|h| &h.origin)
            .collect();

        let mut report = safety::validate(self.repo.as_ref(), req.snapshot, origins).await?;
        if req.snapshot.head_sha.as_deref() != Some(req.base_sha) {
            report.errors.push(format!(
                "Base commit {} is not the HEAD the composer opened on",
                req.base_sha
            ));
        }
        if report.is_valid() {
            debug!(stage = "validate", "repository unchanged");
            Ok(())
        } else {
            Err(ComposerError::SafetyValidation {
                errors: report.errors,
            })
        }
    }

    /// Apply and drop `entry`, looked up by sha since its selector may have shifted
    async fn restore(&self, entry: &StashEntry) -> Result<()> {
        let current = self.repo.get_stash().await?;
        let Some(found) = current.iter().find(|e| e.sha == entry.sha) else {
            return Err(ComposerError::StashConflict {
                message: format!("Stash {} ({}) disappeared", entry.name, entry.sha),
                stash: None,
            });
        };
        self.repo
            .apply_stash(&found.name, true)
            .await
            .map_err(|e| ComposerError::StashConflict {
                message: format!("Failed to restore working changes: {e:#}"),
                stash: Some(found.name.clone()),
            })?;
        debug!(stage = "restore-stash", stash = %found.name, "restored working changes");
        Ok(())
    }
}

fn cancelled(before: FinalizeStage) -> FinalizeOutcome {
    info!(stage = before.label(), "finalization cancelled");
    FinalizeOutcome::Cancelled { before }
}

/// Decide whether `save_stash` produced a new entry. The top entry is ours
/// only if it differs from the one seen before and carries our message.
fn identify_new_stash(
    prior: Option<&StashEntry>,
    top: Option<&StashEntry>,
    message: &str,
) -> Result<Option<StashEntry>> {
    let Some(top) = top else {
        return Ok(None);
    };
    if prior.is_some_and(|p| p.sha == top.sha) {
        return Ok(None);
    }
    if top.message != message {
        return Err(ComposerError::StashConflict {
            message: format!(
                "Newest stash {} has message {:?}, expected {:?}",
                top.name, top.message, message
            ),
            stash: Some(top.name.clone()),
        });
    }
    Ok(Some(top.clone()))
}
