//! Patch synthesis: turns each draft's hunks back into applicable patch text.

use super::drafts::{DraftCommit, DraftPlan};
use super::hunks::{Hunk, HunkOrigin, HunkSet, RENAME_HUNK_HEADER};
use crate::error::{ComposerError, Result};
use crate::git::CommitPatch;

/// One `CommitPatch` per draft that holds hunks, in plan order
pub fn build_patches(plan: &DraftPlan, hunks: &HunkSet) -> Result<Vec<CommitPatch>> {
    let patches = plan
        .committable()
        .map(|draft| build_commit_patch(draft, hunks))
        .collect::<Result<Vec<_>>>()?;

    if patches.is_empty() {
        return Err(ComposerError::EmptyPlan);
    }
    Ok(patches)
}

/// Patch texts for one draft. Hunks are emitted in index order, so staged
/// hunks come before unstaged ones; each origin becomes its own patch text
/// since an unstaged diff only applies on top of the staged one.
pub fn build_commit_patch(draft: &DraftCommit, hunks: &HunkSet) -> Result<CommitPatch> {
    let mut selected: Vec<&Hunk> = draft
        .hunk_indices
        .iter()
        .map(|&i| {
            hunks.get(i).ok_or_else(|| {
                ComposerError::PatchCreation(format!(
                    "Draft {} refers to unknown hunk {}",
                    draft.id, i
                ))
            })
        })
        .collect::<Result<_>>()?;
    selected.sort_by_key(|h| h.index);

    let mut patches: Vec<(HunkOrigin, String)> = Vec::new();
    let mut current_file: Option<(&HunkOrigin, &str)> = None;

    for hunk in selected {
        if patches.last().map(|(o, _)| o) != Some(&hunk.origin) {
            patches.push((hunk.origin.clone(), String::new()));
            current_file = None;
        }
        let Some((_, text)) = patches.last_mut() else {
            continue;
        };

        // Hunks of one file are contiguous in index order; the file header
        // is written once per run
        if current_file != Some((&hunk.origin, hunk.file_name.as_str())) {
            text.push_str(&hunk.diff_header);
            current_file = Some((&hunk.origin, hunk.file_name.as_str()));
        }
        push_hunk(text, hunk);
    }

    Ok(CommitPatch {
        message: draft.message.clone(),
        patches: patches.into_iter().map(|(_, text)| text).collect(),
    })
}

fn push_hunk(text: &mut String, hunk: &Hunk) {
    if hunk.is_rename && hunk.hunk_header == RENAME_HUNK_HEADER {
        // The header block alone carries the rename
        return;
    }
    if !hunk.hunk_header.is_empty() {
        text.push_str(&hunk.hunk_header);
        text.push('\n');
    }
    text.push_str(&hunk.content);
    if !hunk.content.is_empty() && !hunk.content.ends_with('\n') {
        text.push('\n');
    }
}
