//! The generation gateway: grouping hunks into commits and writing commit
//! messages. Both requests are slow and cancellable.

use crate::compose::{DraftCommit, Hunk, HunkMapEntry};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Result of a cancellable request. Cancellation is not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingRequest {
    pub hunks: Vec<Hunk>,
    pub existing_drafts: Vec<DraftCommit>,
    pub hunk_map: Vec<HunkMapEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    /// Digest of the hunk set the request was built from
    #[serde(skip)]
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupedHunk {
    pub hunk: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupedCommit {
    pub message: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub hunks: Vec<GroupedHunk>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupingResult {
    pub commits: Vec<GroupedCommit>,
}

impl GroupingResult {
    /// Drafts named `ai-commit-<n>` in answer order. Indices are passed
    /// through as-is; the draft model normalizes them.
    pub fn into_drafts(self) -> Vec<DraftCommit> {
        self.commits
            .into_iter()
            .enumerate()
            .map(|(i, c)| DraftCommit {
                id: format!("ai-commit-{i}"),
                message: c.message,
                ai_explanation: c.explanation,
                hunk_indices: c.hunks.into_iter().map(|h| h.hunk).collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedMessage {
    pub summary: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl GeneratedMessage {
    /// Full commit message: summary, then a blank line and the body if any
    pub fn to_message(&self) -> String {
        match self.body.as_deref().map(str::trim) {
            Some(body) if !body.is_empty() => format!("{}\n\n{}", self.summary, body),
            _ => self.summary.clone(),
        }
    }
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate_grouping(
        &self,
        request: &GroupingRequest,
        cancel: &CancellationToken,
    ) -> Outcome<GroupingResult>;

    async fn generate_message(
        &self,
        commit_id: &str,
        diff: &str,
        cancel: &CancellationToken,
    ) -> Outcome<GeneratedMessage>;
}

/// Holder for the token of at most one in-flight operation of a kind.
///
/// `begin` cancels whatever was running. The token stays in the slot until
/// the operation that owns it calls `finish`, so a superseded operation can
/// still see that it was cancelled.
#[derive(Default)]
pub struct OperationSlot {
    inner: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    next_id: u64,
    active: Option<(u64, CancellationToken)>,
}

impl OperationSlot {
    pub fn begin(&self) -> (u64, CancellationToken) {
        let mut state = self.inner.lock();
        if let Some((_, previous)) = state.active.take() {
            previous.cancel();
        }
        state.next_id += 1;
        let id = state.next_id;
        let token = CancellationToken::new();
        state.active = Some((id, token.clone()));
        (id, token)
    }

    /// Release the slot if `id` still owns it
    pub fn finish(&self, id: u64) {
        let mut state = self.inner.lock();
        if state.active.as_ref().is_some_and(|(active, _)| *active == id) {
            state.active = None;
        }
    }

    /// Cancel the running operation; false when nothing was running
    pub fn cancel(&self) -> bool {
        match &self.inner.lock().active {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active.is_some()
    }
}
