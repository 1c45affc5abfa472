//! Draft commits and the hunk -> draft assignment.
//!
//! A hunk index belongs to at most one draft at any time. Every mutation
//! that could assign an index removes it from wherever it was before, so the
//! invariant never depends on a later cleanup pass.

use super::hunks::{HunkOrigin, HunkSet};
use crate::error::{ComposerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Id of the draft seeded when a session loads
pub const INITIAL_DRAFT_ID: &str = "draft-commit-1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftCommit {
    pub id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_explanation: Option<String>,
    /// Hunks in this draft; order is kept as given
    #[serde(default)]
    pub hunk_indices: Vec<usize>,
}

impl DraftCommit {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            ai_explanation: None,
            hunk_indices: Vec::new(),
        }
    }
}

/// Ordered draft list; list order is commit order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPlan {
    drafts: Vec<DraftCommit>,
    #[serde(skip)]
    next_id: usize,
}

impl DraftPlan {
    /// Plan with a single draft holding `indices`
    pub fn seeded(indices: Vec<usize>) -> Self {
        let mut plan = Self::default();
        plan.next_id = 2;
        let mut draft = DraftCommit::new(INITIAL_DRAFT_ID, "");
        draft.ai_explanation = Some(String::new());
        draft.hunk_indices = dedup(indices);
        plan.drafts.push(draft);
        plan
    }

    /// Initial plan for a session: staged hunks only when both staged and
    /// unstaged changes exist, every hunk otherwise
    pub fn initial_for(hunks: &HunkSet) -> Self {
        let staged = hunks.indices_from(&HunkOrigin::Staged);
        let has_unstaged = hunks.hunks.iter().any(|h| h.origin == HunkOrigin::Unstaged);
        if !staged.is_empty() && has_unstaged {
            Self::seeded(staged)
        } else {
            Self::seeded(hunks.indices())
        }
    }

    /// Build a plan from generated drafts. Indices unknown to `hunks` are
    /// dropped, and an index claimed by several drafts stays with the first
    /// one.
    pub fn from_drafts(drafts: Vec<DraftCommit>, hunks: &HunkSet) -> Self {
        let mut seen = HashSet::new();
        let drafts: Vec<DraftCommit> = drafts
            .into_iter()
            .map(|mut d| {
                d.hunk_indices
                    .retain(|&i| hunks.contains(i) && seen.insert(i));
                d
            })
            .collect();
        let next_id = drafts.len() + 1;
        Self { drafts, next_id }
    }

    /// Build a plan from user-written drafts, rejecting the first unknown
    /// or doubly assigned hunk index instead of dropping it
    pub fn try_from_drafts(drafts: Vec<DraftCommit>, hunks: &HunkSet) -> Result<Self> {
        let mut owners: HashMap<usize, &str> = HashMap::new();
        for draft in &drafts {
            for &index in &draft.hunk_indices {
                if !hunks.contains(index) {
                    return Err(ComposerError::Assignment(format!(
                        "Draft {} names hunk {index}, which does not exist",
                        draft.id
                    )));
                }
                if let Some(owner) = owners.insert(index, &draft.id) {
                    return Err(ComposerError::Assignment(format!(
                        "Hunk {index} is assigned to both {owner} and {}",
                        draft.id
                    )));
                }
            }
        }
        let next_id = drafts.len() + 1;
        Ok(Self { drafts, next_id })
    }

    pub fn drafts(&self) -> &[DraftCommit] {
        &self.drafts
    }

    pub fn get(&self, id: &str) -> Option<&DraftCommit> {
        self.drafts.iter().find(|d| d.id == id)
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.drafts
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| ComposerError::Assignment(format!("Unknown draft commit: {id}")))
    }

    /// Append an empty draft, returning its id
    pub fn add(&mut self, message: impl Into<String>) -> String {
        let id = loop {
            self.next_id = self.next_id.max(1);
            let candidate = format!("draft-commit-{}", self.next_id);
            self.next_id += 1;
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        self.drafts.push(DraftCommit::new(id.clone(), message));
        id
    }

    /// Remove a draft; its hunks become unassigned
    pub fn remove(&mut self, id: &str) -> Result<DraftCommit> {
        let pos = self.position(id)?;
        Ok(self.drafts.remove(pos))
    }

    /// Move a draft to `new_position` (clamped to the end)
    pub fn reorder(&mut self, id: &str, new_position: usize) -> Result<()> {
        let pos = self.position(id)?;
        let draft = self.drafts.remove(pos);
        let target = new_position.min(self.drafts.len());
        self.drafts.insert(target, draft);
        Ok(())
    }

    pub fn set_message(&mut self, id: &str, message: impl Into<String>) -> Result<()> {
        let pos = self.position(id)?;
        self.drafts[pos].message = message.into();
        Ok(())
    }

    pub fn set_explanation(&mut self, id: &str, explanation: Option<String>) -> Result<()> {
        let pos = self.position(id)?;
        self.drafts[pos].ai_explanation = explanation;
        Ok(())
    }

    /// Assign `index` to draft `to`, or unassign it when `to` is `None`
    pub fn move_hunk(&mut self, hunks: &HunkSet, index: usize, to: Option<&str>) -> Result<()> {
        if !hunks.contains(index) {
            return Err(ComposerError::Assignment(format!("Unknown hunk: {index}")));
        }
        let target = to.map(|id| self.position(id)).transpose()?;

        for draft in &mut self.drafts {
            draft.hunk_indices.retain(|&i| i != index);
        }
        if let Some(pos) = target {
            self.drafts[pos].hunk_indices.push(index);
        }
        Ok(())
    }

    /// Which draft holds `index`, if any
    pub fn owner_of(&self, index: usize) -> Option<&str> {
        self.drafts
            .iter()
            .find(|d| d.hunk_indices.contains(&index))
            .map(|d| d.id.as_str())
    }

    /// Every assigned index, in draft order
    pub fn assigned(&self) -> Vec<usize> {
        self.drafts
            .iter()
            .flat_map(|d| d.hunk_indices.iter().copied())
            .collect()
    }

    /// Hunks of `hunks` that no draft holds, in index order
    pub fn unassigned(&self, hunks: &HunkSet) -> Vec<usize> {
        let assigned: HashSet<usize> = self.assigned().into_iter().collect();
        hunks
            .indices()
            .into_iter()
            .filter(|i| !assigned.contains(i))
            .collect()
    }

    /// Drafts that will actually produce a commit
    pub fn committable(&self) -> impl Iterator<Item = &DraftCommit> {
        self.drafts.iter().filter(|d| !d.hunk_indices.is_empty())
    }
}

fn dedup(indices: Vec<usize>) -> Vec<usize> {
    let mut seen = HashSet::new();
    indices.into_iter().filter(|i| seen.insert(*i)).collect()
}
